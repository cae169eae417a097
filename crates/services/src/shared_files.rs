//! Shared location files: copied into an agent's `shared/` workspace before
//! a turn and synced back out afterward. The engine only touches these at
//! well-defined pipeline points, so agents can collaboratively edit location
//! files without racing the simulation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use hollowbrook_domain::AgentName;

/// Shared directory names accessible from a location. The town square also
/// exposes the bulletin board.
pub fn shared_dirs_for_location(location: &str) -> Vec<&'static str> {
    match location {
        "town_square" => vec!["town_square", "bulletin_board"],
        "workshop" => vec!["workshop"],
        "library" => vec!["library"],
        "residential" => vec!["residential"],
        "garden" => vec!["garden"],
        "riverbank" => vec!["riverbank"],
        _ => vec![],
    }
}

fn all_shared_dirs() -> Vec<&'static str> {
    vec![
        "town_square",
        "bulletin_board",
        "workshop",
        "library",
        "residential",
        "garden",
        "riverbank",
    ]
}

/// Create an agent's directory structure if it does not exist. Returns the
/// agent's root directory.
pub fn ensure_agent_directory(agent: &AgentName, village_root: impl AsRef<Path>) -> Result<PathBuf> {
    let agent_dir = village_root
        .as_ref()
        .join("agents")
        .join(agent.as_str().to_lowercase());

    for subdir in [
        "home",
        "workspace",
        "journal",
        "dreams",
        "memories",
        "inbox",
        "outbox",
    ] {
        fs::create_dir_all(agent_dir.join(subdir))?;
    }

    Ok(agent_dir)
}

pub fn ensure_shared_directories(village_root: impl AsRef<Path>) -> Result<()> {
    let shared_root = village_root.as_ref().join("shared");
    for subdir in all_shared_dirs() {
        fs::create_dir_all(shared_root.join(subdir))?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn relative_files(root: &Path, base: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            relative_files(&entry.path(), base, out)?;
        } else if let Ok(rel) = entry.path().strip_prefix(base) {
            out.push(rel.to_string_lossy().to_string());
        }
    }
    Ok(())
}

/// Copy shared files into the agent's directory before their turn. Returns
/// the relative paths copied, for the context prompt.
pub fn sync_shared_files_in(
    agent_dir: &Path,
    location: &str,
    master_dir: &Path,
) -> Result<Vec<String>> {
    fs::create_dir_all(master_dir)?;
    let shared_dir = agent_dir.join("shared");
    if shared_dir.exists() {
        fs::remove_dir_all(&shared_dir)?;
    }
    fs::create_dir_all(&shared_dir)?;

    let mut copied_files = Vec::new();
    for subdir in shared_dirs_for_location(location) {
        let src = master_dir.join(subdir);
        let dst = shared_dir.join(subdir);
        if src.is_dir() {
            copy_tree(&src, &dst)?;
            relative_files(&dst, agent_dir, &mut copied_files)?;
        }
    }

    if !copied_files.is_empty() {
        debug!(location, files = copied_files.len(), "synced shared files in");
    }
    copied_files.sort();
    Ok(copied_files)
}

/// Copy modified shared files back to the master tree and clear the agent's
/// copy. Uses the location from turn start, not the agent's current location.
pub fn sync_shared_files_out(agent_dir: &Path, location: &str, master_dir: &Path) -> Result<()> {
    let shared_dir = agent_dir.join("shared");
    if !shared_dir.exists() {
        return Ok(());
    }

    let mut synced = 0;
    for subdir in shared_dirs_for_location(location) {
        let src = shared_dir.join(subdir);
        let dst = master_dir.join(subdir);
        if src.is_dir() {
            synced += copy_tree(&src, &dst)?;
        }
    }

    fs::remove_dir_all(&shared_dir)?;
    if synced > 0 {
        debug!(location, files = synced, "synced shared files out");
    }
    Ok(())
}

/// List the shared files currently visible in an agent's directory.
pub fn shared_file_list(agent_dir: &Path) -> Result<Vec<String>> {
    let shared_dir = agent_dir.join("shared");
    if !shared_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    relative_files(&shared_dir, agent_dir, &mut files)?;
    files.sort();
    Ok(files)
}

/// Create `description.md` for each location if missing. Agents can edit
/// these to collaboratively reshape how locations are described.
pub fn ensure_description_files(
    village_root: impl AsRef<Path>,
    descriptions: &[(&str, &str)],
) -> Result<()> {
    let shared = village_root.as_ref().join("shared");
    for (location_id, description) in descriptions {
        let path = shared.join(location_id).join("description.md");
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = format!(
            "<!-- This is what you see when you're in this location.\n\
             Feel free to edit/add to it as the village grows! -->\n\n{description}\n"
        );
        fs::write(&path, content)?;
        debug!(location = location_id, "created description.md");
    }
    Ok(())
}

/// Read a location description from its shared file, stripping HTML comments.
/// Returns `None` when the file is missing or empty after stripping; callers
/// fall back to the `Location` description.
pub fn read_location_description(
    village_root: impl AsRef<Path>,
    location_id: &str,
) -> Option<String> {
    let path = village_root
        .as_ref()
        .join("shared")
        .join(location_id)
        .join("description.md");
    let content = fs::read_to_string(path).ok()?;
    let stripped = strip_html_comments(&content);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn strip_html_comments(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(open) = rest.find("<!--") {
        result.push_str(&rest[..open]);
        match rest[open..].find("-->") {
            Some(close) => rest = &rest[open + close + 3..],
            None => return result,
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_round_trip_copies_files_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("shared");
        let agent_dir = dir.path().join("agents/ember");
        fs::create_dir_all(master.join("workshop")).unwrap();
        fs::create_dir_all(&agent_dir).unwrap();
        fs::write(master.join("workshop/notes.md"), "bench plans").unwrap();

        let copied = sync_shared_files_in(&agent_dir, "workshop", &master).unwrap();
        assert_eq!(copied, vec!["shared/workshop/notes.md".to_string()]);

        // The agent edits a file and adds one; both land back in master.
        fs::write(agent_dir.join("shared/workshop/notes.md"), "bench plans v2").unwrap();
        fs::write(agent_dir.join("shared/workshop/new.md"), "a fresh page").unwrap();
        sync_shared_files_out(&agent_dir, "workshop", &master).unwrap();

        assert_eq!(
            fs::read_to_string(master.join("workshop/notes.md")).unwrap(),
            "bench plans v2"
        );
        assert!(master.join("workshop/new.md").exists());
        assert!(!agent_dir.join("shared").exists());
    }

    #[test]
    fn town_square_sees_the_bulletin_board() {
        assert_eq!(
            shared_dirs_for_location("town_square"),
            vec!["town_square", "bulletin_board"]
        );
        assert!(shared_dirs_for_location("nowhere").is_empty());
    }

    #[test]
    fn description_files_strip_comments_on_read() {
        let dir = tempfile::tempdir().unwrap();
        ensure_description_files(dir.path(), &[("library", "Shelves upon shelves.")]).unwrap();

        let description = read_location_description(dir.path(), "library").unwrap();
        assert_eq!(description, "Shelves upon shelves.");
        assert!(read_location_description(dir.path(), "nowhere").is_none());
    }
}
