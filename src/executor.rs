//! Query executor.
//!
//! Dispatches a [`ParsedQuery`] against one table: acquires the table
//! lock, reads the document through the cache, applies the action and
//! its extensions, enforces the schema and key invariants, and writes
//! the document back for mutations. Any error after the lock is taken
//! releases it without writing.

use crate::config::Config;
use crate::error::Error;
use crate::filter::{row_matches, ResolvedCondition};
use crate::functions;
use crate::parser::{Action, Condition, FnCall, OrderDir, Param, ParsedQuery, WhereValue};
use crate::schema::{ColumnType, Row, TableDoc, ROWID};
use crate::store::TableStore;
use crate::value::{coerce_scalar, parse_value, Value};

use std::path::{Path, PathBuf};

/// One result row, in output form.
pub type OutputRow = serde_json::Map<String, serde_json::Value>;

/// What a query produced.
#[derive(Debug)]
pub(crate) enum Outcome {
    Rows(Vec<OutputRow>),
    Mutated,
}

/// Executes queries against the tables of one database directory.
pub(crate) struct Executor<'a> {
    store: &'a TableStore,
    config: &'a Config,
    database_dir: &'a Path,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a TableStore, config: &'a Config, database_dir: &'a Path) -> Self {
        Executor {
            store,
            config,
            database_dir,
        }
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.database_dir.join(format!("{table}.json"))
    }

    /// Run one parsed query to completion.
    pub fn run(&self, query: &ParsedQuery) -> Result<Outcome, Error> {
        let path = self.table_path(&query.table);
        if !path.exists() {
            return Err(Error::UnknownTable(query.table.clone()));
        }

        let _lock = self.store.lock(&path, self.config)?;
        let mut doc = self.store.read(&path)?;
        tracing::debug!(table = %query.table, action = ?query.action, "executing");

        match query.action {
            Action::Select => self.select(&doc, query).map(Outcome::Rows),
            Action::Count => self.count(&doc, query).map(Outcome::Rows),
            Action::Insert => {
                self.insert(&mut doc, query)?;
                self.store.write(&path, &doc)?;
                Ok(Outcome::Mutated)
            }
            Action::Replace => {
                self.replace(&mut doc, query)?;
                self.store.write(&path, &doc)?;
                Ok(Outcome::Mutated)
            }
            Action::Update => {
                self.update(&mut doc, query)?;
                self.store.write(&path, &doc)?;
                Ok(Outcome::Mutated)
            }
            Action::Delete => {
                self.delete(&mut doc, query)?;
                self.store.write(&path, &doc)?;
                Ok(Outcome::Mutated)
            }
            Action::Truncate => {
                doc.data.clear();
                doc.properties.last_insert_id = 0;
                doc.properties.last_valid_row_id = 0;
                self.store.write(&path, &doc)?;
                Ok(Outcome::Mutated)
            }
        }
    }

    // ── where resolution ─────────────────────────────────────

    /// Resolve the value side of every condition to a concrete value:
    /// `last_insert_id` reads the table counter, literals aimed at a
    /// link column resolve to the target row's link id.
    fn resolve_wheres(
        &self,
        doc: &TableDoc,
        wheres: &[Vec<Condition>],
    ) -> Result<Vec<Vec<ResolvedCondition>>, Error> {
        let mut groups = Vec::with_capacity(wheres.len());
        for group in wheres {
            let mut resolved = Vec::with_capacity(group.len());
            for cond in group {
                let schema = doc
                    .column(&cond.field.column)
                    .ok_or_else(|| Error::UnknownField(cond.field.column.clone()))?;
                let value = match &cond.value {
                    WhereValue::LastInsertId => Value::Int(doc.properties.last_insert_id),
                    WhereValue::Literal(v) => v.clone(),
                };
                let value = match &schema.column_type {
                    link @ ColumnType::Link { .. }
                        if cond.field.func.is_none() && !value.is_null() =>
                    {
                        self.resolve_link(link, &cond.field.column, value)?
                    }
                    _ => value,
                };
                resolved.push(ResolvedCondition {
                    field: cond.field.clone(),
                    op: cond.op,
                    value,
                });
            }
            groups.push(resolved);
        }
        Ok(groups)
    }

    /// Row keys matching the query's `where` groups, in storage order.
    fn matching_keys(&self, doc: &TableDoc, query: &ParsedQuery) -> Result<Vec<String>, Error> {
        let groups = self.resolve_wheres(doc, &query.wheres)?;
        let mut keys = Vec::new();
        for (key, row) in &doc.data {
            if row_matches(doc, row, &groups)? {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    // ── coercion ─────────────────────────────────────────────

    /// Full write-path coercion for one column: default substitution,
    /// `not_null` enforcement, scalar coercion, link resolution.
    fn coerce_for_column(&self, doc: &TableDoc, column: &str, value: Value) -> Result<Value, Error> {
        let schema = doc
            .column(column)
            .ok_or_else(|| Error::UnknownField(column.to_string()))?;

        let value = if value.is_null() {
            match &schema.default {
                Some(default) => default.clone(),
                None => {
                    if schema.not_null {
                        return Err(Error::NotNull(column.to_string()));
                    }
                    return Ok(Value::Null);
                }
            }
        } else {
            value
        };
        if value.is_null() {
            if schema.not_null {
                return Err(Error::NotNull(column.to_string()));
            }
            return Ok(Value::Null);
        }

        match &schema.column_type {
            link @ ColumnType::Link { .. } => self.resolve_link(link, column, value),
            ty => coerce_scalar(value, column, ty, schema.max_length),
        }
    }

    /// Coerce a value through a link target's column type and find the
    /// target row holding it; the stored value is that row's link id.
    fn resolve_link(
        &self,
        link: &ColumnType,
        column: &str,
        value: Value,
    ) -> Result<Value, Error> {
        let ColumnType::Link {
            table,
            column: target_column,
        } = link
        else {
            return Ok(value);
        };

        let target_path = self.table_path(table);
        if !target_path.exists() {
            return Err(Error::UnknownTable(table.clone()));
        }
        let target = self.store.load(&target_path, self.config)?;
        let target_schema = target
            .column(target_column)
            .ok_or_else(|| Error::UnknownField(target_column.clone()))?;
        let needle = coerce_scalar(
            value,
            target_column,
            &target_schema.column_type,
            target_schema.max_length,
        )?;

        for (key, row) in &target.data {
            let held = row.get(target_column).cloned().unwrap_or(Value::Null);
            if !held.is_null() && held.eq_loose(&needle) {
                return Ok(Value::Str(key.clone()));
            }
        }
        Err(Error::LinkMiss {
            table: table.clone(),
            column: column.to_string(),
            value: needle.to_text(),
        })
    }

    // ── value parameters ─────────────────────────────────────

    /// A value-position parameter: a literal, or a scalar call over
    /// literal arguments (`sha1('pw')`, `now()`). The parser's value
    /// branch never produces a bare identifier, so one here is rejected.
    fn eval_value_param(&self, param: &Param) -> Result<Value, Error> {
        match param {
            Param::Value(v) => Ok(v.clone()),
            Param::Call(call) => {
                let args: Vec<Value> = call.args.iter().map(|a| parse_value(a)).collect();
                functions::call(&call.name, &args)
            }
            Param::Ident(name) => Err(Error::parse(format!("'{name}' is not a value"))),
        }
    }

    fn eval_tuple(&self, params: &[Param]) -> Result<Vec<Value>, Error> {
        params.iter().map(|p| self.eval_value_param(p)).collect()
    }

    /// A field-position call: the single argument names a column when
    /// the table has it, otherwise the arguments are literals.
    fn eval_field_call(&self, doc: &TableDoc, row: &Row, call: &FnCall) -> Result<Value, Error> {
        if call.args.len() == 1 && doc.column(&call.args[0]).is_some() {
            let held = row.get(call.args[0].as_str()).cloned().unwrap_or(Value::Null);
            return functions::call(&call.name, &[held]);
        }
        let args: Vec<Value> = call.args.iter().map(|a| parse_value(a)).collect();
        functions::call(&call.name, &args)
    }

    /// The columns an insert/replace tuple feeds: `in(...)` when given,
    /// otherwise every column in schema order.
    fn target_columns(&self, doc: &TableDoc, query: &ParsedQuery) -> Result<Vec<String>, Error> {
        match &query.in_columns {
            Some(cols) => {
                for col in cols {
                    if doc.column(col).is_none() {
                        return Err(Error::UnknownField(col.clone()));
                    }
                }
                Ok(cols.clone())
            }
            None => Ok(doc.column_names().map(String::from).collect()),
        }
    }

    /// All tuples of a multi-row mutation: the action parameters plus
    /// one tuple per `and(...)`, each checked against the column count.
    fn collect_tuples(
        &self,
        query: &ParsedQuery,
        width: usize,
    ) -> Result<Vec<Vec<Value>>, Error> {
        let mut tuples = vec![self.eval_tuple(&query.params)?];
        for extra in &query.and_rows {
            tuples.push(self.eval_tuple(extra)?);
        }
        for tuple in &tuples {
            if tuple.len() != width {
                return Err(Error::Arity {
                    expected: width,
                    got: tuple.len(),
                });
            }
        }
        Ok(tuples)
    }

    // ── integrity ────────────────────────────────────────────

    /// Primary-key tuples must be unique (ignoring all-null tuples), and
    /// no two rows may share a non-null value on any unique key.
    fn check_integrity(&self, doc: &TableDoc, table: &str) -> Result<(), Error> {
        let rows: Vec<&Row> = doc.data.values().collect();

        let pks = &doc.properties.primary_keys;
        if !pks.is_empty() {
            for i in 0..rows.len() {
                for j in i + 1..rows.len() {
                    let mut all_equal = true;
                    let mut any_non_null = false;
                    for pk in pks {
                        let a = rows[i].get(pk.as_str()).cloned().unwrap_or(Value::Null);
                        let b = rows[j].get(pk.as_str()).cloned().unwrap_or(Value::Null);
                        if !a.is_null() || !b.is_null() {
                            any_non_null = true;
                        }
                        if !a.eq_loose(&b) {
                            all_equal = false;
                            break;
                        }
                    }
                    if all_equal && any_non_null {
                        return Err(Error::DupPrimary(table.to_string()));
                    }
                }
            }
        }

        for uk in &doc.properties.unique_keys {
            for i in 0..rows.len() {
                let a = rows[i].get(uk.as_str()).cloned().unwrap_or(Value::Null);
                if a.is_null() {
                    continue;
                }
                for row in rows.iter().skip(i + 1) {
                    let b = row.get(uk.as_str()).cloned().unwrap_or(Value::Null);
                    if !b.is_null() && a.eq_loose(&b) {
                        return Err(Error::DupUnique(uk.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// `last_insert_id` tracks the maximum auto-increment value held by
    /// any row; an empty table keeps its counter (delete never lowers
    /// it).
    fn refresh_last_insert_id(&self, doc: &mut TableDoc) {
        if let Some(ai) = doc.auto_increment_column().map(str::to_string) {
            let max = doc
                .data
                .values()
                .filter_map(|row| match row.get(ai.as_str()) {
                    Some(Value::Int(n)) => Some(*n),
                    _ => None,
                })
                .max();
            if let Some(max) = max {
                doc.properties.last_insert_id = max;
            }
        }
    }

    // ── actions ──────────────────────────────────────────────

    fn insert(&self, doc: &mut TableDoc, query: &ParsedQuery) -> Result<(), Error> {
        let columns = self.target_columns(doc, query)?;
        let tuples = self.collect_tuples(query, columns.len())?;

        let ai_column = doc.auto_increment_column().map(str::to_string);
        let base_link_id = doc.properties.last_link_id;
        let base_row_id = doc.properties.last_valid_row_id;
        let mut next_auto = doc.properties.last_insert_id;

        let mut new_rows = Vec::with_capacity(tuples.len());
        for (k, tuple) in tuples.iter().enumerate() {
            let link_id = base_link_id + 1 + k as i64;
            let row_id = base_row_id + 1 + k as i64;

            let mut row = Row::new();
            row.insert(ROWID.to_string(), Value::Int(row_id));
            for column in doc.column_names() {
                let supplied = columns
                    .iter()
                    .position(|c| c.as_str() == column)
                    .map(|i| tuple[i].clone())
                    .unwrap_or(Value::Null);

                if ai_column.as_deref() == Some(column) && supplied.is_null() {
                    next_auto += 1;
                    row.insert(column.to_string(), Value::Int(next_auto));
                    continue;
                }
                let coerced = self.coerce_for_column(doc, column, supplied)?;
                row.insert(column.to_string(), coerced);
            }
            new_rows.push((format!("#{link_id}"), row));
        }

        for (key, row) in new_rows {
            doc.data.insert(key, row);
        }
        doc.properties.last_link_id = base_link_id + tuples.len() as i64;

        self.check_integrity(doc, &query.table)?;
        doc.normalize_rows();
        self.refresh_last_insert_id(doc);
        Ok(())
    }

    fn replace(&self, doc: &mut TableDoc, query: &ParsedQuery) -> Result<(), Error> {
        let columns = self.target_columns(doc, query)?;
        let tuples = self.collect_tuples(query, columns.len())?;
        let ai_column = doc.auto_increment_column().map(str::to_string);

        // Rows in ascending #rowid order; tuple k overwrites row k.
        // Extra tuples beyond the stored rows are ignored.
        let mut keys: Vec<String> = doc.data.keys().cloned().collect();
        keys.sort_by_key(|k| TableDoc::row_id(&doc.data[k]));

        let mut updates = Vec::new();
        for (tuple, key) in tuples.iter().zip(&keys) {
            let mut merged = Vec::new();
            for (column, value) in columns.iter().zip(tuple) {
                // A null value leaves an auto-increment column alone.
                if ai_column.as_deref() == Some(column.as_str()) && value.is_null() {
                    continue;
                }
                merged.push((column.clone(), self.coerce_for_column(doc, column, value.clone())?));
            }
            updates.push((key.clone(), merged));
        }

        for (key, merged) in updates {
            if let Some(row) = doc.data.get_mut(&key) {
                for (column, value) in merged {
                    row.insert(column, value);
                }
            }
        }

        self.check_integrity(doc, &query.table)?;
        doc.normalize_rows();
        self.refresh_last_insert_id(doc);
        Ok(())
    }

    fn update(&self, doc: &mut TableDoc, query: &ParsedQuery) -> Result<(), Error> {
        let with = query.with_values.as_ref().ok_or(Error::MissingWith)?;

        let mut columns = Vec::with_capacity(query.params.len());
        for param in &query.params {
            match param {
                Param::Ident(name) => columns.push(name.clone()),
                other => {
                    return Err(Error::parse(format!(
                        "update() takes column names, got '{other:?}'"
                    )))
                }
            }
        }
        if columns.len() != with.len() {
            return Err(Error::Arity {
                expected: columns.len(),
                got: with.len(),
            });
        }

        let values = self.eval_tuple(with)?;
        let mut assignments = Vec::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(values) {
            assignments.push((column.clone(), self.coerce_for_column(doc, column, value)?));
        }

        let targets = self.matching_keys(doc, query)?;

        // A row outside the target set must not already hold a target's
        // prospective key values; the targets themselves may keep their
        // own. The primary-key comparison spans the full tuple: each
        // target's current values with the assignments overlaid, never
        // the assigned columns alone.
        let pks = &doc.properties.primary_keys;
        if !pks.is_empty() && assignments.iter().any(|(c, _)| pks.contains(c)) {
            for target_key in &targets {
                let Some(target_row) = doc.data.get(target_key) else {
                    continue;
                };
                let prospective: Vec<Value> = pks
                    .iter()
                    .map(|pk| {
                        assignments
                            .iter()
                            .find(|(c, _)| c == pk)
                            .map(|(_, v)| v.clone())
                            .unwrap_or_else(|| {
                                target_row.get(pk.as_str()).cloned().unwrap_or(Value::Null)
                            })
                    })
                    .collect();
                if prospective.iter().all(Value::is_null) {
                    continue;
                }
                for (key, row) in &doc.data {
                    if targets.contains(key) {
                        continue;
                    }
                    let clash = pks.iter().zip(&prospective).all(|(pk, value)| {
                        row.get(pk.as_str())
                            .cloned()
                            .unwrap_or(Value::Null)
                            .eq_loose(value)
                    });
                    if clash {
                        return Err(Error::DupPrimary(query.table.clone()));
                    }
                }
            }
        }
        for (key, row) in &doc.data {
            if targets.contains(key) {
                continue;
            }
            for (column, value) in &assignments {
                if value.is_null() || !doc.properties.unique_keys.contains(column) {
                    continue;
                }
                let held = row.get(column.as_str()).cloned().unwrap_or(Value::Null);
                if !held.is_null() && held.eq_loose(value) {
                    return Err(Error::DupUnique(column.clone()));
                }
            }
        }

        for key in &targets {
            if let Some(row) = doc.data.get_mut(key) {
                for (column, value) in &assignments {
                    row.insert(column.clone(), value.clone());
                }
            }
        }

        // Several targets written to one unique value still collide.
        self.check_integrity(doc, &query.table)?;
        doc.normalize_rows();
        self.refresh_last_insert_id(doc);
        Ok(())
    }

    fn delete(&self, doc: &mut TableDoc, query: &ParsedQuery) -> Result<(), Error> {
        let targets = self.matching_keys(doc, query)?;
        if targets.is_empty() {
            return Ok(());
        }
        for key in &targets {
            doc.data.shift_remove(key);
        }
        // last_insert_id intentionally untouched.
        doc.properties.last_valid_row_id = doc.max_row_id();
        Ok(())
    }

    fn select(&self, doc: &TableDoc, query: &ParsedQuery) -> Result<Vec<OutputRow>, Error> {
        if query.params.is_empty() {
            return Err(Error::parse("select() needs at least one field"));
        }
        if query.ons.len() != query.links.len() {
            return Err(Error::LinkArityMismatch {
                on: query.ons.len(),
                link: query.links.len(),
            });
        }

        // last_insert_id short-circuits to a single metadata row.
        if query
            .params
            .iter()
            .any(|p| matches!(p, Param::Ident(name) if name == "last_insert_id"))
        {
            let mut row = OutputRow::new();
            row.insert(
                "last_insert_id".to_string(),
                doc.properties.last_insert_id.into(),
            );
            return Ok(vec![row]);
        }

        let groups = self.resolve_wheres(doc, &query.wheres)?;
        let mut rows: Vec<&Row> = Vec::new();
        for row in doc.data.values() {
            if row_matches(doc, row, &groups)? {
                rows.push(row);
            }
        }

        if let Some((column, dir)) = &query.order {
            if doc.column(column).is_none() {
                return Err(Error::UnknownField(column.clone()));
            }
            rows.sort_by(|a, b| {
                let va = a.get(column.as_str()).cloned().unwrap_or(Value::Null);
                let vb = b.get(column.as_str()).cloned().unwrap_or(Value::Null);
                let ord = va.cmp_loose(&vb);
                match dir {
                    OrderDir::Asc => ord,
                    OrderDir::Desc => ord.reverse(),
                }
            });
        }

        if let Some((offset, count)) = query.limit {
            rows = rows.into_iter().skip(offset).take(count).collect();
        }

        // Output fields: `*` expands to every column; names and calls
        // keep their position for aliasing.
        enum Field {
            Column(String),
            Call(FnCall),
        }
        let mut fields = Vec::new();
        if query
            .params
            .iter()
            .any(|p| matches!(p, Param::Ident(name) if name == "*"))
        {
            fields.extend(doc.column_names().map(|c| Field::Column(c.to_string())));
        } else {
            for param in &query.params {
                match param {
                    Param::Ident(name) => {
                        if doc.column(name).is_none() {
                            return Err(Error::UnknownField(name.clone()));
                        }
                        fields.push(Field::Column(name.clone()));
                    }
                    Param::Call(call) => fields.push(Field::Call(call.clone())),
                    Param::Value(v) => {
                        return Err(Error::parse(format!(
                            "select() takes field names, got '{v}'"
                        )))
                    }
                }
            }
        }

        let names: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let default = match field {
                    Field::Column(name) => name.clone(),
                    Field::Call(call) => call.label(),
                };
                match query.aliases.as_ref().and_then(|a| a.get(i)) {
                    Some(alias) if alias != "null" => alias.clone(),
                    _ => default,
                }
            })
            .collect();

        let expansions: Vec<(&String, &Vec<String>)> =
            query.ons.iter().zip(query.links.iter()).collect();

        let mut output = Vec::with_capacity(rows.len());
        for row in rows {
            let mut out = OutputRow::new();
            for (field, name) in fields.iter().zip(&names) {
                let json = match field {
                    Field::Column(column) => {
                        let held = row.get(column.as_str()).cloned().unwrap_or(Value::Null);
                        match expansions.iter().find(|(on, _)| *on == column) {
                            Some((_, link_cols)) => {
                                self.expand_link(doc, column, &held, link_cols)?
                            }
                            None => held.to_json(),
                        }
                    }
                    Field::Call(call) => self.eval_field_call(doc, row, call)?.to_json(),
                };
                out.insert(name.clone(), json);
            }
            output.push(out);
        }
        Ok(output)
    }

    /// Replace a link id with a projection of the linked row. Non-link
    /// columns and null links pass through; a dangling id projects null.
    fn expand_link(
        &self,
        doc: &TableDoc,
        column: &str,
        value: &Value,
        link_cols: &[String],
    ) -> Result<serde_json::Value, Error> {
        let Some(schema) = doc.column(column) else {
            return Err(Error::UnknownField(column.to_string()));
        };
        let ColumnType::Link { table, .. } = &schema.column_type else {
            return Ok(value.to_json());
        };
        if value.is_null() {
            return Ok(serde_json::Value::Null);
        }

        let target_path = self.table_path(table);
        if !target_path.exists() {
            return Err(Error::UnknownTable(table.clone()));
        }
        let target = self.store.load(&target_path, self.config)?;
        let Some(row) = target.data.get(&value.to_text()) else {
            return Ok(serde_json::Value::Null);
        };

        let projected: Vec<String> = if link_cols.iter().any(|c| c == "*") {
            target.column_names().map(String::from).collect()
        } else {
            for col in link_cols {
                if target.column(col).is_none() {
                    return Err(Error::UnknownField(col.clone()));
                }
            }
            link_cols.to_vec()
        };

        let mut out = OutputRow::new();
        for col in projected {
            let held = row.get(col.as_str()).cloned().unwrap_or(Value::Null);
            out.insert(col, held.to_json());
        }
        Ok(serde_json::Value::Object(out))
    }

    fn count(&self, doc: &TableDoc, query: &ParsedQuery) -> Result<Vec<OutputRow>, Error> {
        let mut columns = Vec::new();
        let mut raw_params = Vec::new();
        for param in &query.params {
            match param {
                Param::Ident(name) => {
                    raw_params.push(name.clone());
                    if name == "*" {
                        continue;
                    }
                    if doc.column(name).is_none() {
                        return Err(Error::UnknownField(name.clone()));
                    }
                    columns.push(name.clone());
                }
                other => {
                    return Err(Error::parse(format!(
                        "count() takes column names, got '{other:?}'"
                    )))
                }
            }
        }
        let star = query
            .params
            .iter()
            .any(|p| matches!(p, Param::Ident(name) if name == "*"));
        if star || columns.is_empty() {
            columns = doc.column_names().map(String::from).collect();
        }

        let name = match query.aliases.as_ref().and_then(|a| a.first()) {
            Some(alias) if alias != "null" => alias.clone(),
            _ => format!("count({})", raw_params.join(",")),
        };

        let groups = self.resolve_wheres(doc, &query.wheres)?;
        let mut rows: Vec<&Row> = Vec::new();
        for row in doc.data.values() {
            if row_matches(doc, row, &groups)? {
                rows.push(row);
            }
        }

        // The count of a row set is the max per-column non-null count
        // over the target columns, not a sum.
        let tally = |rows: &[&Row]| -> i64 {
            columns
                .iter()
                .map(|col| {
                    rows.iter()
                        .filter(|row| {
                            row.get(col.as_str()).map(|v| !v.is_null()).unwrap_or(false)
                        })
                        .count() as i64
                })
                .max()
                .unwrap_or(0)
        };

        match &query.group {
            Some(group_col) => {
                if doc.column(group_col).is_none() {
                    return Err(Error::UnknownField(group_col.clone()));
                }
                // Distinct group values in first-seen order.
                let mut buckets: Vec<(Value, Vec<&Row>)> = Vec::new();
                for row in rows {
                    let held = row.get(group_col.as_str()).cloned().unwrap_or(Value::Null);
                    match buckets.iter_mut().find(|(v, _)| v.eq_loose(&held)) {
                        Some((_, bucket)) => bucket.push(row),
                        None => buckets.push((held, vec![row])),
                    }
                }
                let mut output = Vec::with_capacity(buckets.len());
                for (held, bucket) in buckets {
                    let mut out = OutputRow::new();
                    out.insert(name.clone(), tally(&bucket).into());
                    out.insert(group_col.clone(), held.to_json());
                    output.push(out);
                }
                Ok(output)
            }
            None => {
                let mut out = OutputRow::new();
                out.insert(name, tally(&rows).into());
                Ok(vec![out])
            }
        }
    }
}
