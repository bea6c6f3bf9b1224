//! Profile storage: named, file-backed collections of task records.
//!
//! Each profile is one JSON file in the profiles directory. Pure file
//! I/O, no locking; a single-writer assumption holds for the profile
//! directory.

use crate::error::{StorageError, StorageResult};
use crate::{TaskRecord, WindowSelector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Get the app data directory for ghostclick.
pub fn get_app_data_dir() -> PathBuf {
    let base = dirs_next::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("ghostclick")
}

/// A named workspace of serialized tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Profile {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Unique window/process names referenced by the profile's tasks,
    /// shortened for display, sorted.
    pub fn window_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in &self.tasks {
            let task: crate::Task = record.clone().into();
            let name = match task.selector {
                WindowSelector::ByProcess { process_name, .. } => process_name,
                WindowSelector::ByTitle { pattern } => {
                    // First segment of the title, capped for display.
                    pattern
                        .split(" - ")
                        .next()
                        .unwrap_or_default()
                        .chars()
                        .take(20)
                        .collect()
                }
            };
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        names
    }
}

/// Manages the profile directory: list, load, save, rename, import
/// and export.
pub struct ProfileManager {
    profiles_dir: PathBuf,
}

impl ProfileManager {
    /// Create a manager over `profiles_dir`, creating it if needed.
    pub fn new(profiles_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let profiles_dir = profiles_dir.into();
        if !profiles_dir.exists() {
            fs::create_dir_all(&profiles_dir)?;
            info!(?profiles_dir, "created profiles directory");
        }
        Ok(Self { profiles_dir })
    }

    /// Manager over the default per-user profiles directory.
    pub fn with_default_dir() -> StorageResult<Self> {
        Self::new(get_app_data_dir().join("profiles"))
    }

    /// All readable profiles, sorted by name case-insensitively.
    /// Unreadable files are logged and skipped.
    pub fn list_profiles(&self) -> StorageResult<Vec<Profile>> {
        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.profiles_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match read_profile_file(&path) {
                    Ok(profile) => profiles.push(profile),
                    Err(e) => warn!(?path, error = %e, "skipping unreadable profile"),
                }
            }
        }
        profiles.sort_by_key(|p| p.name.to_lowercase());
        Ok(profiles)
    }

    /// Look up a profile by name. `None` when absent or unreadable.
    pub fn get_profile(&self, name: &str) -> Option<Profile> {
        let path = self.file_path(name);
        if !path.exists() {
            return None;
        }
        match read_profile_file(&path) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(?path, error = %e, "failed to read profile");
                None
            }
        }
    }

    /// Save tasks as a new profile or update an existing one,
    /// preserving the original creation timestamp on update.
    pub fn save_profile(
        &self,
        name: &str,
        tasks: Vec<TaskRecord>,
        description: &str,
    ) -> StorageResult<Profile> {
        let now = now_rfc3339();
        let profile = match self.get_profile(name) {
            Some(existing) => Profile {
                name: name.to_string(),
                description: if description.is_empty() {
                    existing.description
                } else {
                    description.to_string()
                },
                tasks,
                created_at: existing.created_at,
                updated_at: now,
            },
            None => Profile {
                name: name.to_string(),
                description: description.to_string(),
                tasks,
                created_at: now.clone(),
                updated_at: now,
            },
        };

        self.write_profile(&profile)?;
        Ok(profile)
    }

    /// Load a profile's task records. Errors with `NotFound` when the
    /// profile does not exist.
    pub fn load_profile(&self, name: &str) -> StorageResult<Vec<TaskRecord>> {
        self.get_profile(name)
            .map(|p| p.tasks)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    /// Remove a profile. Returns whether it existed.
    pub fn delete_profile(&self, name: &str) -> StorageResult<bool> {
        let path = self.file_path(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!(?path, "deleted profile");
        Ok(true)
    }

    /// Rename a profile, keeping its tasks, description and creation
    /// timestamp.
    pub fn rename_profile(&self, old_name: &str, new_name: &str) -> StorageResult<Profile> {
        let existing = self
            .get_profile(old_name)
            .ok_or_else(|| StorageError::NotFound(old_name.to_string()))?;

        let renamed = Profile {
            name: new_name.to_string(),
            description: existing.description,
            tasks: existing.tasks,
            created_at: existing.created_at,
            updated_at: now_rfc3339(),
        };
        self.write_profile(&renamed)?;
        self.delete_profile(old_name)?;
        Ok(renamed)
    }

    /// Copy a profile under a new name.
    pub fn duplicate_profile(&self, name: &str, new_name: &str) -> StorageResult<Profile> {
        let existing = self
            .get_profile(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        self.save_profile(
            new_name,
            existing.tasks,
            &format!("Copy of {}", existing.name),
        )
    }

    /// Export a profile to an external file.
    pub fn export_profile(&self, name: &str, export_path: &Path) -> StorageResult<()> {
        let profile = self
            .get_profile(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let json = serde_json::to_string_pretty(&profile)?;
        fs::write(export_path, json)?;
        info!(?export_path, "exported profile");
        Ok(())
    }

    /// Import a profile from an external file, optionally renaming it.
    pub fn import_profile(
        &self,
        import_path: &Path,
        new_name: Option<&str>,
    ) -> StorageResult<Profile> {
        let mut profile = read_profile_file(import_path)?;
        if let Some(name) = new_name {
            profile.name = name.to_string();
        }
        let name = profile.name.clone();
        let description = profile.description.clone();
        self.save_profile(&name, profile.tasks, &description)
    }

    pub fn profile_exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    fn write_profile(&self, profile: &Profile) -> StorageResult<()> {
        let path = self.file_path(&profile.name);
        let json = serde_json::to_string_pretty(profile)?;
        fs::write(&path, json)?;
        debug!(?path, "saved profile");
        Ok(())
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.profiles_dir
            .join(format!("{}.json", sanitize_filename(name)))
    }
}

fn read_profile_file(path: &Path) -> StorageResult<Profile> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Sanitize a profile name to be a valid filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, title: &str) -> TaskRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "window_title": title,
            "image_name": "btn",
        }))
        .unwrap()
    }

    fn temp_manager() -> (tempfile::TempDir, ProfileManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProfileManager::new(dir.path().join("profiles")).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Profile"), "My Profile");
        assert_eq!(sanitize_filename("work/setup"), "work_setup");
        assert_eq!(sanitize_filename("a:b*c?d"), "a_b_c_d");
    }

    #[test]
    fn save_load_and_list() {
        let (_dir, manager) = temp_manager();
        manager
            .save_profile("Gaming", vec![record(1, "Game")], "night setup")
            .unwrap();
        manager
            .save_profile("alpha", vec![record(1, "A"), record(2, "B")], "")
            .unwrap();

        let profiles = manager.list_profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        // Case-insensitive name ordering.
        assert_eq!(profiles[0].name, "alpha");
        assert_eq!(profiles[1].name, "Gaming");
        assert_eq!(profiles[0].task_count(), 2);

        let tasks = manager.load_profile("Gaming").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].window_title, "Game");
    }

    #[test]
    fn load_missing_profile_is_not_found() {
        let (_dir, manager) = temp_manager();
        assert!(matches!(
            manager.load_profile("nope"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn update_preserves_created_at() {
        let (_dir, manager) = temp_manager();
        let first = manager.save_profile("P", vec![record(1, "X")], "v1").unwrap();
        let second = manager.save_profile("P", vec![record(1, "Y")], "").unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.description, "v1", "empty description keeps the old one");
        assert_eq!(manager.list_profiles().unwrap().len(), 1);
    }

    #[test]
    fn rename_and_duplicate() {
        let (_dir, manager) = temp_manager();
        manager.save_profile("Old", vec![record(1, "X")], "d").unwrap();

        let renamed = manager.rename_profile("Old", "New").unwrap();
        assert_eq!(renamed.name, "New");
        assert!(!manager.profile_exists("Old"));
        assert!(manager.profile_exists("New"));

        let copy = manager.duplicate_profile("New", "New Copy").unwrap();
        assert_eq!(copy.tasks.len(), 1);
        assert_eq!(copy.description, "Copy of New");
        assert!(manager.profile_exists("New"));
    }

    #[test]
    fn delete_reports_existence() {
        let (_dir, manager) = temp_manager();
        manager.save_profile("P", vec![], "").unwrap();
        assert!(manager.delete_profile("P").unwrap());
        assert!(!manager.delete_profile("P").unwrap());
    }

    #[test]
    fn export_and_import_round_trip() {
        let (dir, manager) = temp_manager();
        manager
            .save_profile("Source", vec![record(1, "Win")], "desc")
            .unwrap();

        let export_path = dir.path().join("exported.json");
        manager.export_profile("Source", &export_path).unwrap();

        let imported = manager
            .import_profile(&export_path, Some("Imported"))
            .unwrap();
        assert_eq!(imported.name, "Imported");
        assert_eq!(imported.tasks.len(), 1);
        assert!(manager.profile_exists("Imported"));
    }

    #[test]
    fn unreadable_profile_is_skipped_in_list() {
        let (_dir, manager) = temp_manager();
        manager.save_profile("Good", vec![], "").unwrap();
        fs::write(manager.profiles_dir.join("Bad.json"), "{{ nope").unwrap();
        let profiles = manager.list_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "Good");
    }

    #[test]
    fn window_names_deduplicated_and_sorted() {
        let profile = Profile {
            name: "P".into(),
            description: String::new(),
            tasks: vec![
                record(1, "Zed - main.rs"),
                record(2, "Zed - lib.rs"),
                record(3, "App"),
            ],
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(profile.window_names(), vec!["App".to_string(), "Zed".to_string()]);
    }
}
