//! Connection façade.
//!
//! A [`JsonDb`] points at a root directory laid out as
//! `<root>/servers/<server>/<database>/<table>.json` with credentials in
//! `<root>/config/users.json`. `connect()` verifies the salted SHA-1
//! digests and hands out a [`Session`], the engine's public surface:
//! database and table DDL, `query()`, and `prepare()`.

use crate::config::Config;
use crate::error::Error;
use crate::executor::{Executor, Outcome, OutputRow};
use crate::parser;
use crate::prepared::PreparedStatement;
use crate::schema::{ColumnSchema, ColumnType, TableDoc};
use crate::store::{set_path_permissions, TableStore};
use crate::value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed ASCII salt mixed into the credential digests.
pub const AUTH_SALT: &str = "jsondb";

/// Root handle over one jsondb directory tree.
#[derive(Debug, Clone)]
pub struct JsonDb {
    root: PathBuf,
    config: Config,
    store: Arc<TableStore>,
}

/// One entry of `users.json`: both fields are salted SHA-1 hex digests.
#[derive(Debug, Serialize, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

impl JsonDb {
    /// Open `root` with default configuration and the process-wide
    /// table cache.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonDb::with_config(root, Config::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Self {
        JsonDb {
            root: root.into(),
            config,
            store: TableStore::shared(),
        }
    }

    /// Swap in a private table store (its cache is then coherent only
    /// with sessions sharing it).
    pub fn with_store(mut self, store: Arc<TableStore>) -> Self {
        self.store = store;
        self
    }

    /// The table store behind this handle, for `invalidate`/`reset`.
    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Escape a string for safe concatenation into a query.
    pub fn quote(s: &str) -> String {
        value::quote(s)
    }

    fn servers_dir(&self) -> PathBuf {
        self.root.join("servers")
    }

    fn users_file(&self) -> PathBuf {
        self.root.join("config").join("users.json")
    }

    pub fn server_exists(&self, name: &str) -> bool {
        self.servers_dir().join(name).is_dir()
    }

    /// Create a server directory and register its credentials.
    pub fn create_server(&self, name: &str, username: &str, password: &str) -> Result<(), Error> {
        let server_dir = self.servers_dir().join(name);
        fs::create_dir_all(&server_dir)?;
        set_path_permissions(&self.root);
        set_path_permissions(&self.servers_dir());
        set_path_permissions(&server_dir);

        let config_dir = self.root.join("config");
        fs::create_dir_all(&config_dir)?;
        set_path_permissions(&config_dir);

        let users_file = self.users_file();
        let mut users: HashMap<String, Credentials> = if users_file.exists() {
            serde_json::from_slice(&fs::read(&users_file)?)?
        } else {
            HashMap::new()
        };
        users.insert(
            name.to_string(),
            Credentials {
                username: sha1_hex(&format!("{username}{AUTH_SALT}")),
                password: sha1_hex(&format!("{password}{AUTH_SALT}")),
            },
        );
        fs::write(&users_file, serde_json::to_vec(&users)?)?;
        set_path_permissions(&users_file);
        tracing::info!(server = name, "created server");
        Ok(())
    }

    /// Authenticate against `users.json` and open a session.
    pub fn connect(
        &self,
        server: &str,
        username: &str,
        password: &str,
        database: Option<&str>,
    ) -> Result<Session, Error> {
        if !self.server_exists(server) {
            return Err(Error::Auth(server.to_string()));
        }
        let users: HashMap<String, Credentials> =
            serde_json::from_slice(&fs::read(self.users_file())?)?;
        let entry = users
            .get(server)
            .ok_or_else(|| Error::Auth(server.to_string()))?;
        if entry.username != sha1_hex(&format!("{username}{AUTH_SALT}"))
            || entry.password != sha1_hex(&format!("{password}{AUTH_SALT}"))
        {
            return Err(Error::Auth(server.to_string()));
        }

        let mut session = Session {
            root: self.root.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            server: server.to_string(),
            database: None,
        };
        if let Some(db) = database {
            session.set_database(db)?;
        }
        Ok(session)
    }
}

fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// An authenticated connection to one server.
#[derive(Debug, Clone)]
pub struct Session {
    root: PathBuf,
    config: Config,
    store: Arc<TableStore>,
    server: String,
    database: Option<String>,
}

impl Session {
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    fn server_dir(&self) -> PathBuf {
        self.root.join("servers").join(&self.server)
    }

    fn database_dir(&self) -> Result<PathBuf, Error> {
        let db = self.database.as_ref().ok_or(Error::NoDatabase)?;
        Ok(self.server_dir().join(db))
    }

    fn table_path(&self, table: &str) -> Result<PathBuf, Error> {
        Ok(self.database_dir()?.join(format!("{table}.json")))
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.server_dir().join(name).is_dir()
    }

    /// Select the working database; it must exist.
    pub fn set_database(&mut self, name: &str) -> Result<&mut Session, Error> {
        if !self.database_exists(name) {
            return Err(Error::UnknownDatabase(name.to_string()));
        }
        self.database = Some(name.to_string());
        Ok(self)
    }

    pub fn create_database(&self, name: &str) -> Result<(), Error> {
        let dir = self.server_dir().join(name);
        fs::create_dir_all(&dir)?;
        set_path_permissions(&dir);
        tracing::info!(server = %self.server, database = name, "created database");
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.table_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Create a table in the working database from column declarations.
    ///
    /// Beyond the checks in [`TableDoc::create`], every `link(t.c)`
    /// target must exist and `c` must be a primary or unique key of `t`.
    pub fn create_table(
        &self,
        name: &str,
        columns: IndexMap<String, ColumnSchema>,
    ) -> Result<(), Error> {
        let path = self.table_path(name)?;
        if path.exists() {
            return Err(Error::parse(format!("table '{name}' already exists")));
        }
        let doc = TableDoc::create(columns)?;

        for (column, schema) in &doc.properties.columns {
            if let ColumnType::Link {
                table,
                column: target_column,
            } = &schema.column_type
            {
                let target_path = self.database_dir()?.join(format!("{table}.json"));
                if !target_path.exists() {
                    return Err(Error::UnknownTable(table.clone()));
                }
                let target = self.store.load(&target_path, &self.config)?;
                let target_schema = target
                    .column(target_column)
                    .ok_or_else(|| Error::UnknownField(target_column.clone()))?;
                if !target_schema.primary_key && !target_schema.unique_key {
                    return Err(Error::parse(format!(
                        "link column '{column}' targets '{table}.{target_column}', \
                         which is neither primary nor unique"
                    )));
                }
            }
        }

        self.store.save(&path, &doc, &self.config)?;
        tracing::info!(server = %self.server, table = name, "created table");
        Ok(())
    }

    /// Parse and run one query.
    ///
    /// `select`/`count` produce [`QueryOutput::Rows`]; mutations produce
    /// [`QueryOutput::Mutated`] (`true` on success, errors otherwise).
    pub fn query(&self, text: &str) -> Result<QueryOutput, Error> {
        let started = Instant::now();
        let parsed = parser::parse(text)?;
        let dir = self.database_dir()?;
        let outcome = Executor::new(&self.store, &self.config, &dir).run(&parsed)?;
        Ok(match outcome {
            Outcome::Rows(rows) => QueryOutput::Rows(QueryResult::new(
                rows,
                text.to_string(),
                started.elapsed(),
            )),
            Outcome::Mutated => QueryOutput::Mutated(true),
        })
    }

    /// Capture a query template with `:name` placeholders.
    pub fn prepare(&self, text: &str) -> PreparedStatement<'_> {
        PreparedStatement::new(self, text)
    }
}

/// What a query returned.
#[derive(Debug)]
pub enum QueryOutput {
    Rows(QueryResult),
    Mutated(bool),
}

impl QueryOutput {
    /// The result set, for `select`/`count` outputs.
    pub fn into_rows(self) -> Option<QueryResult> {
        match self {
            QueryOutput::Rows(result) => Some(result),
            QueryOutput::Mutated(_) => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, QueryOutput::Mutated(_))
    }
}

/// An iterable result set with query metadata.
#[derive(Debug)]
pub struct QueryResult {
    rows: Vec<OutputRow>,
    query_string: String,
    elapsed: Duration,
    memory_usage: usize,
    cursor: usize,
}

impl QueryResult {
    fn new(rows: Vec<OutputRow>, query_string: String, elapsed: Duration) -> Self {
        let memory_usage = rows
            .iter()
            .map(|row| serde_json::to_string(row).map(|s| s.len()).unwrap_or(0))
            .sum();
        QueryResult {
            rows,
            query_string,
            elapsed,
            memory_usage,
            cursor: 0,
        }
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The query text this result came from.
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Wall time spent parsing and executing.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Approximate size of the result set: the serialized length of its
    /// rows.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    /// Next row under the internal cursor, or `None` past the end.
    pub fn fetch(&mut self) -> Option<&OutputRow> {
        let row = self.rows.get(self.cursor)?;
        self.cursor += 1;
        Some(row)
    }

    /// Reset the fetch cursor.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl IntoIterator for QueryResult {
    type Item = OutputRow;
    type IntoIter = std::vec::IntoIter<OutputRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a OutputRow;
    type IntoIter = std::slice::Iter<'a, OutputRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepared::BindKind;
    use crate::value::Value;
    use indexmap::indexmap;

    fn fresh_db() -> (tempfile::TempDir, JsonDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDb::new(dir.path()).with_store(Arc::new(TableStore::new()));
        (dir, db)
    }

    fn users_session(db: &JsonDb) -> Session {
        db.create_server("test", "root", "secret").unwrap();
        let session = db.connect("test", "root", "secret", None).unwrap();
        session.create_database("app").unwrap();
        let mut session = session;
        session.set_database("app").unwrap();
        session
            .create_table(
                "users",
                indexmap! {
                    "id".to_string() =>
                        ColumnSchema::new(ColumnType::Int).auto_increment().primary_key(),
                    "name".to_string() =>
                        ColumnSchema::new(ColumnType::String).max_length(15),
                    "active".to_string() =>
                        ColumnSchema::new(ColumnType::Bool).default_value(false),
                },
            )
            .unwrap();
        session
    }

    #[test]
    fn test_directory_layout() {
        let (dir, db) = fresh_db();
        let session = users_session(&db);
        assert!(dir.path().join("config/users.json").is_file());
        assert!(dir.path().join("servers/test/app/users.json").is_file());
        assert!(session.table_exists("users"));
        assert!(!session.table_exists("ghosts"));
        assert!(session.database_exists("app"));
    }

    #[test]
    fn test_connect_rejects_bad_credentials() {
        let (_dir, db) = fresh_db();
        db.create_server("test", "root", "secret").unwrap();

        assert!(matches!(
            db.connect("test", "root", "wrong", None).unwrap_err(),
            Error::Auth(_)
        ));
        assert!(matches!(
            db.connect("test", "eve", "secret", None).unwrap_err(),
            Error::Auth(_)
        ));
        assert!(matches!(
            db.connect("nosuch", "root", "secret", None).unwrap_err(),
            Error::Auth(_)
        ));
        db.connect("test", "root", "secret", None).unwrap();
    }

    #[test]
    fn test_credentials_are_salted_digests() {
        let (dir, db) = fresh_db();
        db.create_server("test", "root", "secret").unwrap();
        let raw = fs::read_to_string(dir.path().join("config/users.json")).unwrap();
        assert!(!raw.contains("root"));
        assert!(!raw.contains("secret"));
        assert!(raw.contains(&sha1_hex("rootjsondb")));
    }

    #[test]
    fn test_query_round_trip_with_metadata() {
        let (_dir, db) = fresh_db();
        let session = users_session(&db);

        let out = session
            .query(&format!("users.insert({}).in(name)", JsonDb::quote("na2axl")))
            .unwrap();
        assert!(matches!(out, QueryOutput::Mutated(true)));

        let mut result = session
            .query("users.select(name)")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.query_string(), "users.select(name)");
        assert!(result.memory_usage() > 0);

        let row = result.fetch().unwrap();
        assert_eq!(row["name"], serde_json::json!("na2axl"));
        assert!(result.fetch().is_none());
        result.rewind();
        assert!(result.fetch().is_some());
    }

    #[test]
    fn test_query_without_database() {
        let (_dir, db) = fresh_db();
        db.create_server("test", "root", "secret").unwrap();
        let session = db.connect("test", "root", "secret", None).unwrap();
        assert!(matches!(
            session.query("users.select(*)").unwrap_err(),
            Error::NoDatabase
        ));
    }

    #[test]
    fn test_set_database_requires_existence() {
        let (_dir, db) = fresh_db();
        db.create_server("test", "root", "secret").unwrap();
        let mut session = db.connect("test", "root", "secret", None).unwrap();
        assert!(matches!(
            session.set_database("nope").unwrap_err(),
            Error::UnknownDatabase(_)
        ));
        session.create_database("app").unwrap();
        session.set_database("app").unwrap();
        assert_eq!(session.database(), Some("app"));
    }

    #[test]
    fn test_create_table_validates_link_targets() {
        let (_dir, db) = fresh_db();
        let session = users_session(&db);

        // Target column must be a key.
        let err = session
            .create_table(
                "posts",
                indexmap! {
                    "author".to_string() =>
                        ColumnSchema::new("link(users.name)".parse().unwrap()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        // Target table must exist.
        let err = session
            .create_table(
                "posts",
                indexmap! {
                    "author".to_string() =>
                        ColumnSchema::new("link(ghosts.id)".parse().unwrap()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTable(_)));

        session
            .create_table(
                "posts",
                indexmap! {
                    "author".to_string() =>
                        ColumnSchema::new("link(users.id)".parse().unwrap()),
                },
            )
            .unwrap();
        let err = session.create_table("posts", indexmap! {}).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_s7_prepared_bind_matches_literal_insert() {
        let (_dir, db) = fresh_db();
        let session = users_session(&db);

        let mut stmt = session.prepare("users.insert(:n).in(name)");
        assert_eq!(stmt.keys(), [":n"]);
        stmt.bind(":n", "na2axl", BindKind::String).unwrap();
        assert!(matches!(stmt.execute().unwrap(), QueryOutput::Mutated(true)));

        let result = session
            .query("users.select(name).where(id=1)")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.rows()[0]["name"], serde_json::json!("na2axl"));

        // An INT bound into a string column stores its textual form.
        let mut stmt = session.prepare("users.insert(:n).in(name)");
        stmt.bind(":n", 42i64, BindKind::Int).unwrap();
        stmt.execute().unwrap();
        let result = session
            .query("users.select(name).where(id=2)")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.rows()[0]["name"], serde_json::json!("42"));
    }

    #[test]
    fn test_bind_rebinding_replaces() {
        let (_dir, db) = fresh_db();
        let session = users_session(&db);

        let mut stmt = session.prepare("users.insert(:n).in(name)");
        stmt.bind(":n", "first", BindKind::String).unwrap();
        stmt.bind(":n", "second", BindKind::String).unwrap();
        stmt.execute().unwrap();

        let result = session
            .query("users.select(name)")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.rows()[0]["name"], serde_json::json!("second"));
    }

    #[test]
    fn test_bind_errors() {
        let (_dir, db) = fresh_db();
        let session = users_session(&db);

        let mut stmt = session.prepare("users.insert(:n).in(name)");
        assert!(stmt.bind(":ghost", "x", BindKind::String).is_err());
        // Unbound placeholders fail at execute, before any I/O.
        assert!(matches!(stmt.execute().unwrap_err(), Error::Parse(_)));
    }

    #[test]
    fn test_prepared_bool_and_null_markers() {
        let (_dir, db) = fresh_db();
        let session = users_session(&db);

        let mut stmt = session.prepare("users.insert(:n, :a).in(name, active)");
        stmt.bind(":n", Value::Null, BindKind::Null).unwrap();
        stmt.bind(":a", true, BindKind::Bool).unwrap();
        stmt.execute().unwrap();

        let result = session
            .query("users.select(name, active)")
            .unwrap()
            .into_rows()
            .unwrap();
        // Null name passes through (no default), bool lands as bool.
        assert_eq!(result.rows()[0]["name"], serde_json::Value::Null);
        assert_eq!(result.rows()[0]["active"], serde_json::json!(true));
    }
}
