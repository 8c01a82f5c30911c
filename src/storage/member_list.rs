//! Member list input for follow checks
//!
//! Any records file with `id` and `username` columns can drive a follow
//! check; both harvested collections qualify. A `protected` column is used
//! when present.

use crate::storage::traits::{StorageError, StorageResult};
use std::fs::File;
use std::path::Path;

/// One account read from a records file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub username: String,
    pub protected: bool,
}

/// Reads every member row of a records file, in file order
///
/// # Returns
///
/// * `Ok(Vec<Member>)` - Rows in file order; missing cells come back empty
/// * `Err(StorageError::SchemaMismatch)` - The header lacks `id` or `username`
/// * `Err(StorageError)` - The file could not be read
pub fn read_members(path: &Path) -> StorageResult<Vec<Member>> {
    let file = File::open(path).map_err(|e| StorageError::file(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let header = reader.headers()?.clone();
    let column = |name: &str| header.iter().position(|h| h == name);
    let (Some(id_column), Some(username_column)) = (column("id"), column("username")) else {
        return Err(StorageError::SchemaMismatch {
            path: path.to_path_buf(),
            expected: vec!["id".to_string(), "username".to_string()],
            found: header.iter().map(str::to_string).collect(),
        });
    };
    let protected_column = column("protected");

    let mut members = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cell = |i: usize| row.get(i).unwrap_or_default().trim().to_string();
        members.push(Member {
            id: cell(id_column),
            username: cell(username_column),
            protected: protected_column.map_or(false, |i| row.get(i) == Some("True")),
        });
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_reads_members_by_header_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("members.csv");
        fs::write(
            &path,
            "id,username,name,protected\n1,alice,Alice,False\n2,bob,Bob,True\n",
        )
        .unwrap();

        let members = read_members(&path).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].username, "alice");
        assert!(!members[0].protected);
        assert_eq!(members[1].id, "2");
        assert!(members[1].protected);
    }

    #[test]
    fn test_protected_column_is_optional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("following.csv");
        fs::write(&path, "username,id\ncarol,3\n").unwrap();

        let members = read_members(&path).unwrap();
        assert_eq!(
            members,
            vec![Member {
                id: "3".to_string(),
                username: "carol".to_string(),
                protected: false,
            }]
        );
    }

    #[test]
    fn test_missing_username_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.csv");
        fs::write(&path, "id\n1\n").unwrap();

        assert!(matches!(
            read_members(&path),
            Err(StorageError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_members(&dir.path().join("nope.csv")),
            Err(StorageError::File { .. })
        ));
    }
}
