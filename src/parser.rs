//! JQL parser.
//!
//! Parses dotted query expressions like
//! `users.select(id,name).where(id=1).order(name,desc).limit(0,10)`
//! into a [`ParsedQuery`]. The first call segment is the action, every
//! later segment an extension. Quoted text travels with its structural
//! characters escaped (`quote()`), so splitting on `.` and `,` is safe.

use crate::error::Error;
use crate::value::{parse_value, Value};

/// Supported actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    Truncate,
    Count,
}

impl Action {
    fn parse(name: &str) -> Result<Action, Error> {
        match name {
            "select" => Ok(Action::Select),
            "insert" => Ok(Action::Insert),
            "replace" => Ok(Action::Replace),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "truncate" => Ok(Action::Truncate),
            "count" => Ok(Action::Count),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }

    /// True for actions whose parameters are values rather than columns.
    fn takes_values(self) -> bool {
        matches!(self, Action::Insert | Action::Replace)
    }
}

/// A function call in a parameter or field position, e.g. `sha1(name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FnCall {
    pub name: String,
    /// Raw argument tokens; the executor decides whether each names a
    /// column or carries a literal.
    pub args: Vec<String>,
}

impl FnCall {
    /// Canonical text of the call, used as a result column name.
    pub fn label(&self) -> String {
        format!("{}({})", self.name, self.args.join(","))
    }
}

/// One query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// A literal value (insert/replace positions).
    Value(Value),
    /// A bare identifier: a column name, `*`, or `last_insert_id`.
    Ident(String),
    /// A scalar function call.
    Call(FnCall),
}

/// Comparison operators, longest-match first in the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `%=`: field is divisible by the value.
    DivisibleBy,
    /// `%!`: field is not divisible by the value.
    NotDivisibleBy,
}

const OPERATORS: [(&str, CmpOp); 9] = [
    ("%!", CmpOp::NotDivisibleBy),
    ("%=", CmpOp::DivisibleBy),
    ("!=", CmpOp::Ne),
    ("<>", CmpOp::Ne),
    ("<=", CmpOp::Le),
    (">=", CmpOp::Ge),
    ("=", CmpOp::Eq),
    ("<", CmpOp::Lt),
    (">", CmpOp::Gt),
];

/// The field side of a `where` term: a column, optionally wrapped in a
/// scalar function.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    pub column: String,
    pub func: Option<String>,
}

/// The value side of a `where` term.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereValue {
    /// The literal `last_insert_id`, resolved against the table at
    /// execution time.
    LastInsertId,
    Literal(Value),
}

/// A single `field OP value` term.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: FieldExpr,
    pub op: CmpOp,
    pub value: WhereValue,
}

/// Sort direction for `order(col, dir)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

/// A fully parsed query.
///
/// Extensions that may repeat (`where`, `and`, `on`, `link`) accumulate
/// in call order; the single-shot ones reject a second occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub table: String,
    pub action: Action,
    pub params: Vec<Param>,
    /// OR of AND groups.
    pub wheres: Vec<Vec<Condition>>,
    /// Extra tuples for multi-insert / multi-replace.
    pub and_rows: Vec<Vec<Param>>,
    pub order: Option<(String, OrderDir)>,
    /// `(offset, count)`.
    pub limit: Option<(usize, usize)>,
    pub in_columns: Option<Vec<String>>,
    pub with_values: Option<Vec<Param>>,
    pub aliases: Option<Vec<String>>,
    pub group: Option<String>,
    pub ons: Vec<String>,
    pub links: Vec<Vec<String>>,
}

/// Parse a query string.
pub fn parse(query: &str) -> Result<ParsedQuery, Error> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::parse("empty query"));
    }

    let segments: Vec<&str> = query.split('.').collect();
    if segments.len() < 2 {
        return Err(Error::parse(format!("no action call in '{query}'")));
    }

    let table = segments[0].trim();
    if !is_identifier(table) {
        return Err(Error::parse(format!("bad table name '{table}'")));
    }

    let (action_name, action_args) = split_call(segments[1])?;
    let action = Action::parse(action_name)?;
    let params = parse_params(action, &action_args)?;

    let mut parsed = ParsedQuery {
        table: table.to_string(),
        action,
        params,
        wheres: Vec::new(),
        and_rows: Vec::new(),
        order: None,
        limit: None,
        in_columns: None,
        with_values: None,
        aliases: None,
        group: None,
        ons: Vec::new(),
        links: Vec::new(),
    };

    for segment in &segments[2..] {
        let (name, args) = split_call(segment)?;
        apply_extension(&mut parsed, name, args)?;
    }

    Ok(parsed)
}

fn apply_extension(parsed: &mut ParsedQuery, name: &str, args: Vec<String>) -> Result<(), Error> {
    let require_args = |min: usize, max: usize| -> Result<(), Error> {
        if args.len() < min || args.len() > max {
            let bound = if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min}..{max}")
            };
            Err(Error::parse(format!(
                "{name}() takes {bound} argument(s), got {}",
                args.len()
            )))
        } else {
            Ok(())
        }
    };
    let once_only = |slot_taken: bool| -> Result<(), Error> {
        if slot_taken {
            Err(Error::parse(format!("duplicate {name}() extension")))
        } else {
            Ok(())
        }
    };

    match name {
        "order" => {
            require_args(1, 2)?;
            once_only(parsed.order.is_some())?;
            let dir = match args.get(1).map(String::as_str) {
                None | Some("asc") => OrderDir::Asc,
                Some("desc") => OrderDir::Desc,
                Some(other) => {
                    return Err(Error::parse(format!("bad order direction '{other}'")));
                }
            };
            parsed.order = Some((args[0].clone(), dir));
        }
        "where" => {
            require_args(1, usize::MAX)?;
            let group = args
                .iter()
                .map(|term| parse_condition(term))
                .collect::<Result<Vec<_>, _>>()?;
            parsed.wheres.push(group);
        }
        "and" => {
            require_args(1, usize::MAX)?;
            let tuple = args.iter().map(|a| parse_value_param(a)).collect();
            parsed.and_rows.push(tuple);
        }
        "limit" => {
            require_args(1, 2)?;
            once_only(parsed.limit.is_some())?;
            let first = parse_count(name, &args[0])?;
            parsed.limit = Some(match args.get(1) {
                Some(second) => (first, parse_count(name, second)?),
                None => (0, first),
            });
        }
        "in" => {
            require_args(1, usize::MAX)?;
            once_only(parsed.in_columns.is_some())?;
            parsed.in_columns = Some(args);
        }
        "with" => {
            require_args(1, usize::MAX)?;
            once_only(parsed.with_values.is_some())?;
            parsed.with_values = Some(args.iter().map(|a| parse_value_param(a)).collect());
        }
        "as" => {
            require_args(1, usize::MAX)?;
            once_only(parsed.aliases.is_some())?;
            parsed.aliases = Some(args);
        }
        "group" => {
            require_args(1, 1)?;
            once_only(parsed.group.is_some())?;
            parsed.group = Some(args.into_iter().next().unwrap_or_default());
        }
        "on" => {
            require_args(1, 1)?;
            parsed.ons.push(args.into_iter().next().unwrap_or_default());
        }
        "link" => {
            require_args(1, usize::MAX)?;
            parsed.links.push(args);
        }
        other => return Err(Error::UnknownExtension(other.to_string())),
    }
    Ok(())
}

fn parse_count(ext: &str, token: &str) -> Result<usize, Error> {
    token
        .parse::<usize>()
        .map_err(|_| Error::parse(format!("bad {ext}() bound '{token}'")))
}

fn parse_params(action: Action, args: &[String]) -> Result<Vec<Param>, Error> {
    let params = args
        .iter()
        .map(|token| {
            if action.takes_values() {
                Ok(parse_value_param(token))
            } else if let Ok(call) = try_fn_call(token) {
                Ok(Param::Call(call))
            } else {
                Ok(Param::Ident(token.clone()))
            }
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(params)
}

/// A value-position token: function call or literal.
fn parse_value_param(token: &str) -> Param {
    match try_fn_call(token) {
        Ok(call) => Param::Call(call),
        Err(_) => Param::Value(parse_value(token)),
    }
}

/// Parse `field OP value` with a left-to-right, longest-match operator
/// scan. The field side never contains an operator character, so the
/// first match is the split point.
fn parse_condition(term: &str) -> Result<Condition, Error> {
    for (i, _) in term.char_indices() {
        for (text, op) in OPERATORS {
            if term[i..].starts_with(text) {
                let field = parse_field(term[..i].trim())?;
                let value = term[i + text.len()..].trim();
                if value.is_empty() {
                    return Err(Error::parse(format!("missing value in '{term}'")));
                }
                let value = if value == "last_insert_id" {
                    WhereValue::LastInsertId
                } else {
                    WhereValue::Literal(parse_value(value))
                };
                return Ok(Condition {
                    field,
                    op,
                    value,
                });
            }
        }
    }
    Err(Error::BadOperator(term.to_string()))
}

fn parse_field(text: &str) -> Result<FieldExpr, Error> {
    if text.is_empty() {
        return Err(Error::parse("missing field in where() term"));
    }
    if let Ok(call) = try_fn_call(text) {
        if call.args.len() != 1 {
            return Err(Error::parse(format!(
                "field position takes fn(column), got '{text}'"
            )));
        }
        return Ok(FieldExpr {
            column: call.args[0].clone(),
            func: Some(call.name),
        });
    }
    if !is_identifier(text) {
        return Err(Error::parse(format!("bad field '{text}'")));
    }
    Ok(FieldExpr {
        column: text.to_string(),
        func: None,
    })
}

/// Split a `name(args)` segment. The opening paren must match the final
/// character of the segment.
fn split_call(segment: &str) -> Result<(&str, Vec<String>), Error> {
    let segment = segment.trim();
    let open = segment
        .find('(')
        .ok_or_else(|| Error::parse(format!("expected a call, got '{segment}'")))?;
    let name = &segment[..open];
    if !is_identifier(name) {
        return Err(Error::parse(format!("bad call name in '{segment}'")));
    }
    if !segment.ends_with(')') || !parens_balanced(&segment[open..]) {
        return Err(Error::parse(format!("unbalanced parentheses in '{segment}'")));
    }
    let inner = &segment[open + 1..segment.len() - 1];
    Ok((name, split_args(inner)?))
}

/// Split an argument list on top-level commas; commas nested in
/// parentheses belong to inner calls and survive the split.
fn split_args(inner: &str) -> Result<Vec<String>, Error> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in inner.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::parse(format!("unbalanced parentheses in '{inner}'")))?;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);

    let mut args = Vec::with_capacity(parts.len());
    for part in parts {
        let part = part.trim().to_string();
        if part.is_empty() {
            return Err(Error::parse(format!("empty argument in '{inner}'")));
        }
        args.push(part);
    }
    Ok(args)
}

/// Parse a token of the form `ident(args)` into a function call.
fn try_fn_call(token: &str) -> Result<FnCall, Error> {
    let (name, args) = split_call(token)?;
    Ok(FnCall {
        name: name.to_string(),
        args,
    })
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !s.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// True when every `(` in `s` closes, and the last close is the final
/// character.
fn parens_balanced(s: &str) -> bool {
    let mut depth = 0i64;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::quote;

    #[test]
    fn test_parse_select_with_extensions() {
        let q = parse("users.select(name).order(name,desc).limit(0,2)").unwrap();
        assert_eq!(q.table, "users");
        assert_eq!(q.action, Action::Select);
        assert_eq!(q.params, vec![Param::Ident("name".to_string())]);
        assert_eq!(q.order, Some(("name".to_string(), OrderDir::Desc)));
        assert_eq!(q.limit, Some((0, 2)));
    }

    #[test]
    fn test_limit_single_arg_means_count() {
        let q = parse("users.select(*).limit(5)").unwrap();
        assert_eq!(q.limit, Some((0, 5)));
    }

    #[test]
    fn test_parse_insert_values() {
        let q = parse("users.insert('na2axl', 42, true, null).in(name,id,active,extra)").unwrap();
        assert_eq!(
            q.params,
            vec![
                Param::Value(Value::Str("na2axl".to_string())),
                Param::Value(Value::Int(42)),
                Param::Value(Value::Bool(true)),
                Param::Value(Value::Null),
            ]
        );
        assert_eq!(
            q.in_columns.as_deref(),
            Some(&["name".to_string(), "id".to_string(), "active".to_string(), "extra".to_string()][..])
        );
    }

    #[test]
    fn test_quoted_structurals_survive() {
        let text = "it's, a (test). done;";
        let q = parse(&format!("users.insert({})", quote(text))).unwrap();
        assert_eq!(q.params, vec![Param::Value(Value::Str(text.to_string()))]);
    }

    #[test]
    fn test_nested_call_commas_survive() {
        let q = parse("users.select(name).where(id%=2,sha1(name)='ff')").unwrap();
        let group = &q.wheres[0];
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].op, CmpOp::DivisibleBy);
        assert_eq!(group[1].field.func.as_deref(), Some("sha1"));
        assert_eq!(group[1].field.column, "name");
    }

    #[test]
    fn test_multiple_where_groups_accumulate() {
        let q = parse("users.select(*).where(id=1).where(id=2,active=true)").unwrap();
        assert_eq!(q.wheres.len(), 2);
        assert_eq!(q.wheres[0].len(), 1);
        assert_eq!(q.wheres[1].len(), 2);
    }

    #[test]
    fn test_operator_longest_match() {
        for (term, op) in [
            ("id>=3", CmpOp::Ge),
            ("id<=3", CmpOp::Le),
            ("id<>3", CmpOp::Ne),
            ("id!=3", CmpOp::Ne),
            ("id%!3", CmpOp::NotDivisibleBy),
            ("id>3", CmpOp::Gt),
            ("id=3", CmpOp::Eq),
        ] {
            let q = parse(&format!("t.select(*).where({term})")).unwrap();
            assert_eq!(q.wheres[0][0].op, op, "{term}");
        }
    }

    #[test]
    fn test_last_insert_id_value() {
        let q = parse("users.select(*).where(id=last_insert_id)").unwrap();
        assert_eq!(q.wheres[0][0].value, WhereValue::LastInsertId);
    }

    #[test]
    fn test_and_tuples() {
        let q = parse("users.insert('a').and('b').and('c')").unwrap();
        assert_eq!(q.and_rows.len(), 2);
        assert_eq!(
            q.and_rows[1],
            vec![Param::Value(Value::Str("c".to_string()))]
        );
    }

    #[test]
    fn test_insert_function_value() {
        let q = parse("users.insert(now(), sha1('pw'))").unwrap();
        match &q.params[0] {
            Param::Call(call) => {
                assert_eq!(call.name, "now");
                assert!(call.args.is_empty());
            }
            other => panic!("expected call, got {other:?}"),
        }
        match &q.params[1] {
            Param::Call(call) => assert_eq!(call.args, vec!["'pw'".to_string()]),
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(parse("users"), Err(Error::Parse(_))));
        assert!(matches!(parse("users.drop()"), Err(Error::UnknownAction(_))));
        assert!(matches!(
            parse("users.select(*).explode(1)"),
            Err(Error::UnknownExtension(_))
        ));
        assert!(matches!(
            parse("users.select(*).order(a).order(b)"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            parse("users.select(*).order(a,b,c)"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            parse("users.select(*).where(id~3)"),
            Err(Error::BadOperator(_))
        ));
        assert!(matches!(parse("users.select(a,,b)"), Err(Error::Parse(_))));
        assert!(matches!(parse("users.select(a"), Err(Error::Parse(_))));
        assert!(matches!(parse("9users.select(a)"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_group_on_link() {
        let q = parse("users.count(*).as(n).group(active)").unwrap();
        assert_eq!(q.group.as_deref(), Some("active"));
        assert_eq!(q.aliases.as_deref(), Some(&["n".to_string()][..]));

        let q = parse("posts.select(*).on(author).link(name,id).on(topic).link(*)").unwrap();
        assert_eq!(q.ons, vec!["author", "topic"]);
        assert_eq!(q.links.len(), 2);
        assert_eq!(q.links[1], vec!["*".to_string()]);
    }
}
