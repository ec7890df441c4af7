//! Extension pour intégrer la base de données dans pmoconfig
//!
//! Ce module fournit le trait `DatabaseConfigExt` qui permet d'ajouter
//! les méthodes d'accès à la base du Content Directory à
//! `pmoconfig::Config`.

use crate::SqliteDatabase;
use anyhow::Result;
use pmoconfig::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_DATABASE_FILE: &str = "pmolibrary.db";

/// Trait d'extension pour gérer la base du Content Directory
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmodatabase::DatabaseConfigExt;
///
/// let config = get_config();
/// let database = config.open_database()?;
/// ```
pub trait DatabaseConfigExt {
    /// Récupère le chemin du fichier de base de données
    ///
    /// Un chemin relatif est résolu par rapport au répertoire de
    /// configuration.
    fn get_database_file(&self) -> Result<PathBuf>;

    /// Définit le chemin du fichier de base de données
    fn set_database_file(&self, file: String) -> Result<()>;

    /// Ouvre (et initialise si nécessaire) la base configurée
    fn open_database(&self) -> Result<Arc<SqliteDatabase>>;
}

impl DatabaseConfigExt for Config {
    fn get_database_file(&self) -> Result<PathBuf> {
        let file = self.get_string_or(&["server", "database", "file"], DEFAULT_DATABASE_FILE);
        let path = Path::new(&file);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(Path::new(self.get_config_dir()).join(path))
        }
    }

    fn set_database_file(&self, file: String) -> Result<()> {
        self.set_value(
            &["server", "database", "file"],
            serde_yaml::Value::String(file),
        )?;
        Ok(())
    }

    fn open_database(&self) -> Result<Arc<SqliteDatabase>> {
        let path = self.get_database_file()?;
        tracing::info!(database = %path.display(), "Opening content database");
        let db = SqliteDatabase::open(&path)?;
        Ok(Arc::new(db))
    }
}
