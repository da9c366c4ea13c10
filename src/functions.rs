//! Scalar functions callable in field positions and values.
//!
//! All functions are pure apart from the two clock reads. Dispatch is by
//! name; wrong arity and unknown names are rejected before any table is
//! touched.

use crate::error::Error;
use crate::value::Value;
use chrono::Local;
use sha1::{Digest, Sha1};

/// Default `now()` rendering: `YYYY-MM-DD HH:MM:SS`.
const NOW_DEFAULT_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// strftime tokens `now(fmt)` accepts.
const NOW_TOKENS: &str = "aAdmewWbByYHkMS";

/// Invoke the scalar function `name` with `args`.
pub fn call(name: &str, args: &[Value]) -> Result<Value, Error> {
    match name {
        "sha1" => {
            let [arg] = expect_args::<1>(name, args)?;
            let mut hasher = Sha1::new();
            hasher.update(arg.to_text().as_bytes());
            Ok(Value::Str(hex::encode(hasher.finalize())))
        }
        "md5" => {
            let [arg] = expect_args::<1>(name, args)?;
            Ok(Value::Str(format!(
                "{:x}",
                md5::compute(arg.to_text().as_bytes())
            )))
        }
        "time" => {
            expect_args::<0>(name, args)?;
            Ok(Value::Int(Local::now().timestamp_millis()))
        }
        "now" => {
            let fmt = match args {
                [] => NOW_DEFAULT_FMT.to_string(),
                [fmt] => {
                    let fmt = fmt.to_text();
                    validate_now_format(&fmt)?;
                    fmt
                }
                _ => {
                    return Err(Error::FnArity {
                        name: name.to_string(),
                        expected: "0..1".to_string(),
                        got: args.len(),
                    })
                }
            };
            Ok(Value::Str(Local::now().format(&fmt).to_string()))
        }
        "lowercase" => {
            let [arg] = expect_args::<1>(name, args)?;
            Ok(Value::Str(arg.to_text().to_lowercase()))
        }
        "uppercase" => {
            let [arg] = expect_args::<1>(name, args)?;
            Ok(Value::Str(arg.to_text().to_uppercase()))
        }
        "ucfirst" => {
            let [arg] = expect_args::<1>(name, args)?;
            let text = arg.to_text();
            let mut chars = text.chars();
            Ok(Value::Str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }))
        }
        "strlen" => {
            let [arg] = expect_args::<1>(name, args)?;
            Ok(Value::Int(arg.to_text().chars().count() as i64))
        }
        other => Err(Error::UnknownFn(other.to_string())),
    }
}

fn expect_args<'a, const N: usize>(name: &str, args: &'a [Value]) -> Result<&'a [Value; N], Error> {
    args.try_into().map_err(|_| Error::FnArity {
        name: name.to_string(),
        expected: N.to_string(),
        got: args.len(),
    })
}

/// Reject `%` tokens outside the supported subset; everything else in
/// the format string passes through verbatim.
fn validate_now_format(fmt: &str) -> Result<(), Error> {
    let mut chars = fmt.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            continue;
        }
        match chars.next() {
            Some(token) if NOW_TOKENS.contains(token) => {}
            Some(token) => {
                return Err(Error::parse(format!("unsupported now() token '%{token}'")));
            }
            None => return Err(Error::parse("dangling '%' in now() format")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    #[test]
    fn test_digests() {
        assert_eq!(
            call("sha1", &[s("abc")]).unwrap(),
            s("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(
            call("md5", &[s("abc")]).unwrap(),
            s("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn test_digest_of_non_string_uses_textual_form() {
        assert_eq!(
            call("sha1", &[Value::Int(42)]).unwrap(),
            call("sha1", &[s("42")]).unwrap()
        );
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(call("lowercase", &[s("AbC")]).unwrap(), s("abc"));
        assert_eq!(call("uppercase", &[s("AbC")]).unwrap(), s("ABC"));
        assert_eq!(call("ucfirst", &[s("na2axl")]).unwrap(), s("Na2axl"));
        assert_eq!(call("ucfirst", &[s("")]).unwrap(), s(""));
        assert_eq!(call("strlen", &[s("héllo")]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_clock_functions() {
        match call("time", &[]).unwrap() {
            Value::Int(ms) => assert!(ms > 1_500_000_000_000),
            other => panic!("expected int, got {other:?}"),
        }
        match call("now", &[]).unwrap() {
            // YYYY-MM-DD HH:MM:SS
            Value::Str(text) => assert_eq!(text.len(), 19),
            other => panic!("expected string, got {other:?}"),
        }
        match call("now", &[s("%Y")]).unwrap() {
            Value::Str(year) => assert_eq!(year.len(), 4),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_and_unknown() {
        assert!(matches!(
            call("sha1", &[]),
            Err(Error::FnArity { got: 0, .. })
        ));
        assert!(matches!(
            call("time", &[s("x")]),
            Err(Error::FnArity { got: 1, .. })
        ));
        assert!(matches!(call("rot13", &[s("x")]), Err(Error::UnknownFn(_))));
    }

    #[test]
    fn test_now_rejects_unknown_tokens() {
        assert!(call("now", &[s("%Q")]).is_err());
        assert!(call("now", &[s("trailing %")]).is_err());
        assert!(call("now", &[s("%Y-%m-%d")]).is_ok());
    }
}
