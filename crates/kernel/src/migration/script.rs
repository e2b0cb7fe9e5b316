//! Sectioned SQL migration files.
//!
//! A migration file carries its forward and backward statements in one
//! file, split by `-- up` and `-- down` marker lines:
//!
//! ```sql
//! -- up
//! CREATE TABLE posts (id BIGSERIAL PRIMARY KEY, title TEXT NOT NULL);
//!
//! -- down
//! DROP TABLE posts;
//! ```
//!
//! Statements before any marker belong to the up section, so a plain SQL
//! file with no markers is a forward-only migration.

/// One migration file's executable halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// Forward statements.
    pub up: String,
    /// Backward statements; `None` makes the migration irreversible.
    pub down: Option<String>,
}

#[derive(PartialEq)]
enum Section {
    Up,
    Down,
}

fn marker(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix("--") else {
        return None;
    };
    match rest.trim().to_ascii_lowercase().as_str() {
        "up" => Some(Section::Up),
        "down" => Some(Section::Down),
        _ => None,
    }
}

impl MigrationScript {
    /// Split `source` into up and down sections.
    pub fn parse(source: &str) -> Self {
        let mut up = String::new();
        let mut down = String::new();
        let mut section = Section::Up;

        for line in source.lines() {
            if let Some(next) = marker(line) {
                section = next;
                continue;
            }
            let target = match section {
                Section::Up => &mut up,
                Section::Down => &mut down,
            };
            target.push_str(line);
            target.push('\n');
        }

        let down = down.trim();
        Self {
            up: up.trim().to_string(),
            down: if down.is_empty() {
                None
            } else {
                Some(down.to_string())
            },
        }
    }
}
