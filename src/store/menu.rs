use super::{db_now, to_db_time, Store};
use anyhow::{Context, Result};
use rusqlite::params;

impl Store {
    /// Records that the custom menu should be shown to `location_id`.
    pub fn add_menu_install(&self, location_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                r#"
                INSERT INTO menu_installs (location_id, updated_at) VALUES (?1, ?2)
                ON CONFLICT(location_id) DO UPDATE SET updated_at = excluded.updated_at
                "#,
                params![location_id, to_db_time(db_now())],
            )
            .context("Failed to record menu install")?;
        Ok(())
    }

    pub fn remove_menu_install(&self, location_id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM menu_installs WHERE location_id = ?1",
                params![location_id],
            )
            .context("Failed to remove menu install")?;
        Ok(rows > 0)
    }

    /// Every location the menu is shown to, sorted.
    pub fn list_menu_installs(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT location_id FROM menu_installs ORDER BY location_id")
            .context("Failed to prepare query")?;

        let locations = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query menu installs")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read menu install rows")?;
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_store;

    #[test]
    fn test_menu_installs_are_a_set() {
        let store = test_store();
        store.add_menu_install("loc2").unwrap();
        store.add_menu_install("loc1").unwrap();
        store.add_menu_install("loc2").unwrap();

        assert_eq!(store.list_menu_installs().unwrap(), vec!["loc1", "loc2"]);

        assert!(store.remove_menu_install("loc2").unwrap());
        assert!(!store.remove_menu_install("loc2").unwrap());
        assert_eq!(store.list_menu_installs().unwrap(), vec!["loc1"]);
    }
}
