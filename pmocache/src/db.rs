//! Module de gestion de la base de données SQLite pour le cache
//!
//! Ce module indexe les sources en cache, avec leurs métadonnées HTTP
//! et le suivi des accès utilisé par la politique LRU.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// Entrée de cache représentant une source dans la base de données
#[derive(Debug, Serialize, Clone)]
pub struct CacheEntry {
    /// Clé primaire unique (hash SHA1 de l'identifiant source)
    pub pk: String,
    /// Identifiant source (chemin local ou URI)
    pub source: String,
    /// Taille du blob en octets
    pub size: i64,
    /// Nombre d'accès à l'élément
    pub hits: i32,
    /// Date/heure du dernier accès (RFC3339)
    pub last_used: Option<String>,
    /// Métadonnées JSON (type MIME, validateur, en-têtes)
    pub metadata_json: Option<String>,
}

impl CacheEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(CacheEntry {
            pk: row.get(0)?,
            source: row.get(1)?,
            size: row.get(2)?,
            hits: row.get(3)?,
            last_used: row.get(4)?,
            metadata_json: row.get(5)?,
        })
    }
}

/// Base de données SQLite pour le cache
///
/// Gère les métadonnées des sources en cache :
/// - Clés primaires (pk) et identifiants sources
/// - Statistiques d'utilisation (hits, last_used)
/// - Opérations CRUD de base
#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
    table_name: String,
}

impl DB {
    /// Initialise une nouvelle base de données avec une table personnalisée
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmocache::db::DB;
    /// use std::path::Path;
    ///
    /// let db = DB::init(Path::new("cache.db"), "sources").unwrap();
    /// ```
    pub fn init(path: &Path, table_name: &str) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        let create_table_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                pk TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                hits INTEGER DEFAULT 0,
                last_used TEXT,
                metadata_json TEXT
            )",
            table_name
        );

        conn.execute(&create_table_sql, [])?;

        // Index composite pour la politique LRU (get_oldest)
        let create_lru_index_sql = format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_lru ON {} (last_used ASC, hits ASC)",
            table_name, table_name
        );

        conn.execute(&create_lru_index_sql, [])?;

        Ok(Self {
            conn: Mutex::new(conn),
            table_name: table_name.to_string(),
        })
    }

    /// Ajoute ou met à jour une entrée dans la base de données
    ///
    /// # Arguments
    ///
    /// * `pk` - Clé primaire de l'élément
    /// * `source` - Identifiant source
    /// * `size` - Taille du blob en octets
    /// * `metadata_json` - Métadonnées JSON optionnelles
    pub fn add(
        &self,
        pk: &str,
        source: &str,
        size: u64,
        metadata_json: Option<&str>,
    ) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "INSERT INTO {} (pk, source, size, hits, last_used, metadata_json)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)
             ON CONFLICT(pk) DO UPDATE SET
                 source = excluded.source,
                 size = excluded.size,
                 last_used = excluded.last_used,
                 metadata_json = excluded.metadata_json",
            self.table_name
        );

        conn.execute(
            &sql,
            params![
                pk,
                source,
                size as i64,
                Utc::now().to_rfc3339(),
                metadata_json
            ],
        )?;

        Ok(())
    }

    /// Récupère une entrée de la base de données par sa clé
    pub fn get(&self, pk: &str) -> rusqlite::Result<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT pk, source, size, hits, last_used, metadata_json FROM {} WHERE pk = ?1",
            self.table_name
        );

        conn.query_row(&sql, [pk], CacheEntry::from_row).optional()
    }

    /// Met à jour le compteur d'accès et la date du dernier accès
    pub fn update_hit(&self, pk: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "UPDATE {} SET hits = hits + 1, last_used = ?1 WHERE pk = ?2",
            self.table_name
        );

        conn.execute(&sql, params![Utc::now().to_rfc3339(), pk])?;

        Ok(())
    }

    /// Purge toutes les entrées de la base de données
    pub fn purge(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("DELETE FROM {}", self.table_name);
        conn.execute(&sql, [])?;
        Ok(())
    }

    /// Récupère toutes les entrées, triées par nombre d'accès décroissant
    pub fn get_all(&self) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT pk, source, size, hits, last_used, metadata_json FROM {} ORDER BY hits DESC",
            self.table_name
        );

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], CacheEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// Supprime une entrée de la base de données
    pub fn delete(&self, pk: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("DELETE FROM {} WHERE pk = ?1", self.table_name);
        conn.execute(&sql, [pk])?;
        Ok(())
    }

    /// Compte le nombre total d'entrées dans le cache
    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT COUNT(*) FROM {}", self.table_name);
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Récupère les N entrées les plus anciennes (LRU - Least Recently Used)
    ///
    /// Trie par last_used (les plus anciens en premier), puis par hits (les moins utilisés).
    pub fn get_oldest(&self, limit: usize) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT pk, source, size, hits, last_used, metadata_json
             FROM {}
             ORDER BY last_used ASC, hits ASC
             LIMIT ?1",
            self.table_name
        );

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([limit as i64], CacheEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}
