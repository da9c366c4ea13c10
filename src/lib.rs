//! jsondb — an embedded, file-backed relational-style database.
//!
//! Each server is a directory, each database a subdirectory, each table
//! a single JSON document holding its schema and rows. Tables are
//! manipulated through a compact dotted query language:
//!
//! ```text
//! users.select(name).where(active=true).order(name,desc).limit(0,10)
//! users.insert('na2axl').in(name)
//! users.update(name).with('other').where(id=1)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use indexmap::indexmap;
//! use jsondb::{ColumnSchema, ColumnType, JsonDb, QueryOutput};
//!
//! fn main() -> Result<(), jsondb::Error> {
//!     let db = JsonDb::new("./data");
//!     db.create_server("local", "root", "secret")?;
//!
//!     let mut session = db.connect("local", "root", "secret", None)?;
//!     session.create_database("app")?;
//!     session.set_database("app")?;
//!     session.create_table(
//!         "users",
//!         indexmap! {
//!             "id".to_string() =>
//!                 ColumnSchema::new(ColumnType::Int).auto_increment().primary_key(),
//!             "name".to_string() =>
//!                 ColumnSchema::new(ColumnType::String).max_length(15),
//!         },
//!     )?;
//!
//!     session.query(&format!("users.insert({}).in(name)", JsonDb::quote("na2axl")))?;
//!     if let QueryOutput::Rows(result) = session.query("users.select(*)")? {
//!         for row in &result {
//!             println!("{}", serde_json::to_string(row)?);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod functions;
pub mod nonblocking;
pub mod parser;
pub mod prepared;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;

pub use config::Config;
pub use error::Error;
pub use executor::OutputRow;
pub use nonblocking::AsyncSession;
pub use parser::ParsedQuery;
pub use prepared::{BindKind, PreparedStatement};
pub use schema::{ColumnSchema, ColumnType, Row, TableDoc, ROWID};
pub use session::{JsonDb, QueryOutput, QueryResult, Session, AUTH_SALT};
pub use store::TableStore;
pub use value::{parse_value, quote, Value};
