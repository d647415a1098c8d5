//! Plain-text folder tree of an indexed workspace, included in prompts.

use std::collections::BTreeSet;

/// Path components skipped when rendering.
pub const DEFAULT_EXCLUDED_DIRS: [&str; 4] = ["venv", "node_modules", ".git", "__pycache__"];

#[derive(Debug, Default)]
struct Dir {
    /// Children in first-seen order of the sorted path list.
    entries: Vec<(String, Option<Dir>)>,
}

impl Dir {
    fn insert(&mut self, parts: &[&str]) {
        let Some((first, rest)) = parts.split_first() else {
            return;
        };
        let pos = match self.entries.iter().position(|(name, _)| name == first) {
            Some(pos) => pos,
            None => {
                self.entries.push(((*first).to_owned(), None));
                self.entries.len() - 1
            }
        };
        if rest.is_empty() {
            return;
        }
        let child = self.entries[pos].1.get_or_insert_with(Dir::default);
        child.insert(rest);
    }

    fn render(&self, out: &mut String, prefix: &str, depth: usize) {
        let count = self.entries.len();
        for (i, (name, child)) in self.entries.iter().enumerate() {
            let last = i + 1 == count;
            let connector = match (depth, last) {
                (0, _) => "",
                (_, true) => "└── ",
                (_, false) => "├── ",
            };
            out.push_str(prefix);
            out.push_str(connector);
            out.push_str(name);
            out.push('\n');
            if let Some(child) = child {
                let next = format!("{prefix}{}", if last { "    " } else { "│   " });
                child.render(out, &next, depth + 1);
            }
        }
    }
}

/// Render the unique `paths` as a tree with a summary header.
///
/// Paths with any component in `excluded` are dropped before counting.
#[must_use]
pub fn render_folder_structure<'a, I>(paths: I, excluded: &[String]) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let unique: BTreeSet<&str> = paths
        .into_iter()
        .filter(|p| !p.is_empty())
        .filter(|p| !p.split('/').any(|part| excluded.iter().any(|e| e == part)))
        .collect();

    let mut root = Dir::default();
    for path in &unique {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        root.insert(&parts);
    }

    let mut out = format!(
        "Found {} unique file paths (excluding {})\n\nFolder Structure:\n",
        unique.len(),
        excluded.join(", ")
    );
    root.render(&mut out, "", 0);
    out
}

#[must_use]
pub fn default_excluded_dirs() -> Vec<String> {
    DEFAULT_EXCLUDED_DIRS.iter().map(|s| (*s).to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_tree() {
        let paths = [
            "src/app/main.py",
            "src/app/models.py",
            "src/util.py",
            "README.md",
            "src/app/main.py",
        ];
        let out = render_folder_structure(paths, &default_excluded_dirs());
        let expected = concat!(
            "Found 4 unique file paths (excluding venv, node_modules, .git, __pycache__)\n\n",
            "Folder Structure:\n",
            "README.md\n",
            "src\n",
            "    ├── app\n",
            "    │   ├── main.py\n",
            "    │   └── models.py\n",
            "    └── util.py\n",
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn excluded_components_dropped() {
        let paths = [
            "app.py",
            "node_modules/x/index.js",
            "pkg/__pycache__/m.pyc",
            "venv/lib/site.py",
        ];
        let out = render_folder_structure(paths, &default_excluded_dirs());
        assert!(out.starts_with("Found 1 unique file paths"));
        assert!(out.ends_with("Folder Structure:\napp.py\n"));
    }

    #[test]
    fn root_directory_not_last_uses_bar_prefix() {
        let out = render_folder_structure(["a/x.py", "b.py"], &default_excluded_dirs());
        assert!(out.ends_with("a\n│   └── x.py\nb.py\n"));
    }

    #[test]
    fn empty_input_renders_header_only() {
        let out = render_folder_structure(std::iter::empty(), &default_excluded_dirs());
        assert_eq!(
            out,
            "Found 0 unique file paths (excluding venv, node_modules, .git, __pycache__)\n\nFolder Structure:\n"
        );
    }
}
