//! Async façade.
//!
//! The core engine is synchronous; this wrapper runs the same
//! operations on the tokio blocking pool so async callers never park an
//! executor thread on file I/O or a lock wait. Contracts are identical
//! to [`Session`].

use crate::error::Error;
use crate::prepared::BindKind;
use crate::session::{QueryOutput, Session};
use crate::value::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// A [`Session`] whose operations resolve as futures.
#[derive(Debug, Clone)]
pub struct AsyncSession {
    inner: Arc<Mutex<Session>>,
}

impl AsyncSession {
    pub fn new(session: Session) -> Self {
        AsyncSession {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, Error> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = inner.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut session)
        })
        .await
        .map_err(|err| Error::Io(std::io::Error::other(err)))?
    }

    pub async fn query(&self, text: &str) -> Result<QueryOutput, Error> {
        let text = text.to_string();
        self.run(move |session| session.query(&text)).await
    }

    /// Prepare-and-execute in one hop: each binding is
    /// `(key, value, kind)`.
    pub async fn query_prepared(
        &self,
        template: &str,
        bindings: Vec<(String, Value, BindKind)>,
    ) -> Result<QueryOutput, Error> {
        let template = template.to_string();
        self.run(move |session| {
            let mut stmt = session.prepare(&template);
            for (key, value, kind) in bindings {
                stmt.bind(&key, value, kind)?;
            }
            stmt.execute()
        })
        .await
    }

    pub async fn set_database(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        self.run(move |session| session.set_database(&name).map(|_| ()))
            .await
    }

    pub async fn create_database(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        self.run(move |session| session.create_database(&name)).await
    }

    pub async fn database_exists(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.run(move |session| Ok(session.database_exists(&name)))
            .await
    }

    pub async fn create_table(
        &self,
        name: &str,
        columns: indexmap::IndexMap<String, crate::ColumnSchema>,
    ) -> Result<(), Error> {
        let name = name.to_string();
        self.run(move |session| session.create_table(&name, columns))
            .await
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.run(move |session| Ok(session.table_exists(&name))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType};
    use crate::session::JsonDb;
    use crate::store::TableStore;
    use indexmap::indexmap;

    #[tokio::test]
    async fn test_async_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = JsonDb::new(dir.path()).with_store(Arc::new(TableStore::new()));
        db.create_server("test", "root", "secret").unwrap();
        let session = db.connect("test", "root", "secret", None).unwrap();
        let session = AsyncSession::new(session);

        session.create_database("app").await.unwrap();
        session.set_database("app").await.unwrap();
        session
            .create_table(
                "users",
                indexmap! {
                    "name".to_string() => ColumnSchema::new(ColumnType::String),
                },
            )
            .await
            .unwrap();
        assert!(session.table_exists("users").await.unwrap());

        session.query("users.insert('na2axl')").await.unwrap();
        session
            .query_prepared(
                "users.insert(:n)",
                vec![(":n".to_string(), Value::from("other"), BindKind::String)],
            )
            .await
            .unwrap();

        let result = session
            .query("users.select(name).order(name,asc)")
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        let names: Vec<&serde_json::Value> =
            result.rows().iter().map(|row| &row["name"]).collect();
        assert_eq!(
            names,
            vec![&serde_json::json!("na2axl"), &serde_json::json!("other")]
        );
    }
}
