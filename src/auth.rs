//! Credential store (external collaborator, consulted only by login and
//! `adduser`; spec §6).
//!
//! A colon-separated text file, one user per line: `name:password:home`.
//! Credential-line size accounting is always `name:password:home\n`,
//! including both separators (spec §9 flags the original source as
//! inconsistent here).

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{ShellError, ShellResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub home: String,
}

impl Credential {
    fn parse(line: &str) -> Option<Credential> {
        let mut parts = line.splitn(3, ':');
        let username = parts.next()?.to_string();
        let password = parts.next()?.to_string();
        let home = parts.next()?.to_string();
        if username.is_empty() {
            return None;
        }
        Some(Credential {
            username,
            password,
            home,
        })
    }

    fn render(&self) -> String {
        format!("{}:{}:{}\n", self.username, self.password, self.home)
    }
}

pub fn load_credentials(path: &Path) -> ShellResult<Vec<Credential>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).map_err(ShellError::CredentialIo)?;
    Ok(contents.lines().filter_map(Credential::parse).collect())
}

/// Verifies `username`/`password` against the store, returning the
/// matched record on success.
pub fn authenticate(path: &Path, username: &str, password: &str) -> ShellResult<Credential> {
    let creds = load_credentials(path)?;
    creds
        .into_iter()
        .find(|c| c.username == username && c.password == password)
        .ok_or(ShellError::AuthFailed)
}

pub fn user_exists(path: &Path, username: &str) -> ShellResult<bool> {
    Ok(load_credentials(path)?.iter().any(|c| c.username == username))
}

/// Appends a new credential triple. Caller is responsible for the
/// root-only guard (spec §4.6) and for creating the user's home
/// directory.
pub fn add_user(path: &Path, username: &str, password: &str, home: &str) -> ShellResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ShellError::CredentialIo)?;
        }
    }
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(ShellError::CredentialIo)?;
    let record = Credential {
        username: username.to_string(),
        password: password.to_string(),
        home: home.to_string(),
    };
    f.write_all(record.render().as_bytes())
        .map_err(ShellError::CredentialIo)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_matches_username_and_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users");
        add_user(&path, "root", "toor", "/root").unwrap();
        add_user(&path, "alice", "secret", "/home/alice").unwrap();

        let cred = authenticate(&path, "alice", "secret").unwrap();
        assert_eq!(cred.home, "/home/alice");

        assert!(matches!(
            authenticate(&path, "alice", "wrong"),
            Err(ShellError::AuthFailed)
        ));
    }

    #[test]
    fn user_exists_reflects_store_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users");
        assert!(!user_exists(&path, "bob").unwrap());
        add_user(&path, "bob", "pw", "/home/bob").unwrap();
        assert!(user_exists(&path, "bob").unwrap());
    }

    #[test]
    fn missing_store_has_no_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist");
        assert!(load_credentials(&path).unwrap().is_empty());
    }
}
