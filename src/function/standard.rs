//! The standard function library, installed into a fresh registry at
//! engine build time. Function families are generated per datatype where
//! the semantics are uniform; the XACML function URIs are the normative
//! names, with short-name lookup layered on top by the registry.

use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;

use super::{
    FunctionDef, FunctionKind, FunctionRegistry, HigherOrderOp, LogicalOp, Signature,
    XACML_1_0_FUNCTION, XACML_2_0_FUNCTION, XACML_3_0_FUNCTION,
};
use crate::errors::IndeterminateError;
use crate::expression::{Resolved, TypeMeta};
use crate::value::{Bag, DataType, Value};

pub(super) fn install(reg: &mut FunctionRegistry) {
    install_logical(reg);
    install_equality(reg);
    install_arithmetic(reg);
    install_comparison(reg);
    install_string(reg);
    install_casts(reg);
    install_bag(reg);
    install_set(reg);
    install_regexp(reg);
    install_temporal_arithmetic(reg);
    install_name_matching(reg);
    install_higher_order(reg);
}

fn eager(
    reg: &mut FunctionRegistry,
    id: String,
    signature: Signature,
    f: impl Fn(&[Resolved]) -> Result<Resolved, IndeterminateError> + Send + Sync + 'static,
) {
    reg.register(FunctionDef::new(
        id,
        signature,
        FunctionKind::Eager(Arc::new(f)),
    ));
}

fn ok_bool(b: bool) -> Result<Resolved, IndeterminateError> {
    Ok(Resolved::Value(Value::Boolean(b)))
}

fn ok_value(v: Value) -> Result<Resolved, IndeterminateError> {
    Ok(Resolved::Value(v))
}

fn value(args: &[Resolved], i: usize) -> Result<&Value, IndeterminateError> {
    args[i].expect_value()
}

fn bag(args: &[Resolved], i: usize) -> Result<&Bag, IndeterminateError> {
    args[i].expect_bag()
}

// ─── Logical ────────────────────────────────────────────────────────────

fn install_logical(reg: &mut FunctionRegistry) {
    let boolean = TypeMeta::value(DataType::Boolean);
    reg.register(FunctionDef::new(
        format!("{XACML_1_0_FUNCTION}and"),
        Signature::variadic(vec![], boolean, 0, boolean),
        FunctionKind::Logical(LogicalOp::And),
    ));
    reg.register(FunctionDef::new(
        format!("{XACML_1_0_FUNCTION}or"),
        Signature::variadic(vec![], boolean, 0, boolean),
        FunctionKind::Logical(LogicalOp::Or),
    ));
    reg.register(FunctionDef::new(
        format!("{XACML_1_0_FUNCTION}n-of"),
        Signature::variadic(vec![TypeMeta::value(DataType::Integer)], boolean, 0, boolean),
        FunctionKind::Logical(LogicalOp::Nof),
    ));
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}not"),
        Signature::fixed(vec![boolean], boolean),
        |args| ok_bool(!value(args, 0)?.as_boolean()?),
    );
}

// ─── Equality ───────────────────────────────────────────────────────────

fn install_equality(reg: &mut FunctionRegistry) {
    let families: [(DataType, &str); 16] = [
        (DataType::String, XACML_1_0_FUNCTION),
        (DataType::Boolean, XACML_1_0_FUNCTION),
        (DataType::Integer, XACML_1_0_FUNCTION),
        (DataType::Double, XACML_1_0_FUNCTION),
        (DataType::Date, XACML_1_0_FUNCTION),
        (DataType::Time, XACML_1_0_FUNCTION),
        (DataType::DateTime, XACML_1_0_FUNCTION),
        (DataType::DayTimeDuration, XACML_3_0_FUNCTION),
        (DataType::YearMonthDuration, XACML_3_0_FUNCTION),
        (DataType::AnyUri, XACML_1_0_FUNCTION),
        (DataType::X500Name, XACML_1_0_FUNCTION),
        (DataType::Rfc822Name, XACML_1_0_FUNCTION),
        (DataType::HexBinary, XACML_1_0_FUNCTION),
        (DataType::Base64Binary, XACML_1_0_FUNCTION),
        (DataType::IpAddress, XACML_2_0_FUNCTION),
        (DataType::DnsName, XACML_2_0_FUNCTION),
    ];
    for (dt, prefix) in families {
        let meta = TypeMeta::value(dt);
        eager(
            reg,
            format!("{prefix}{}-equal", dt.short_name()),
            Signature::fixed(vec![meta, meta], TypeMeta::value(DataType::Boolean)),
            |args| ok_bool(value(args, 0)? == value(args, 1)?),
        );
    }
    eager(
        reg,
        format!("{XACML_3_0_FUNCTION}string-equal-ignore-case"),
        Signature::fixed(
            vec![
                TypeMeta::value(DataType::String),
                TypeMeta::value(DataType::String),
            ],
            TypeMeta::value(DataType::Boolean),
        ),
        |args| {
            ok_bool(
                value(args, 0)?.as_string()?.to_lowercase()
                    == value(args, 1)?.as_string()?.to_lowercase(),
            )
        },
    );
}

// ─── Arithmetic ─────────────────────────────────────────────────────────

fn overflow() -> IndeterminateError {
    IndeterminateError::processing("integer arithmetic overflow")
}

fn install_arithmetic(reg: &mut FunctionRegistry) {
    let int = TypeMeta::value(DataType::Integer);
    let dbl = TypeMeta::value(DataType::Double);

    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-add"),
        Signature::variadic(vec![], int, 2, int),
        |args| {
            let mut sum: i64 = 0;
            for arg in args {
                sum = sum
                    .checked_add(arg.expect_value()?.as_integer()?)
                    .ok_or_else(overflow)?;
            }
            ok_value(Value::Integer(sum))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-multiply"),
        Signature::variadic(vec![], int, 2, int),
        |args| {
            let mut product: i64 = 1;
            for arg in args {
                product = product
                    .checked_mul(arg.expect_value()?.as_integer()?)
                    .ok_or_else(overflow)?;
            }
            ok_value(Value::Integer(product))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-subtract"),
        Signature::fixed(vec![int, int], int),
        |args| {
            let diff = value(args, 0)?
                .as_integer()?
                .checked_sub(value(args, 1)?.as_integer()?)
                .ok_or_else(overflow)?;
            ok_value(Value::Integer(diff))
        },
    );
    // Integer division truncates toward zero; division by zero is a
    // processing error, unlike the double form.
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-divide"),
        Signature::fixed(vec![int, int], int),
        |args| {
            let quotient = value(args, 0)?
                .as_integer()?
                .checked_div(value(args, 1)?.as_integer()?)
                .ok_or_else(|| IndeterminateError::processing("integer divide by zero"))?;
            ok_value(Value::Integer(quotient))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-mod"),
        Signature::fixed(vec![int, int], int),
        |args| {
            let rem = value(args, 0)?
                .as_integer()?
                .checked_rem(value(args, 1)?.as_integer()?)
                .ok_or_else(|| IndeterminateError::processing("integer mod by zero"))?;
            ok_value(Value::Integer(rem))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-abs"),
        Signature::fixed(vec![int], int),
        |args| {
            let abs = value(args, 0)?.as_integer()?.checked_abs().ok_or_else(overflow)?;
            ok_value(Value::Integer(abs))
        },
    );

    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}double-add"),
        Signature::variadic(vec![], dbl, 2, dbl),
        |args| {
            let mut sum = 0.0;
            for arg in args {
                sum += arg.expect_value()?.as_double()?;
            }
            ok_value(Value::Double(sum))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}double-multiply"),
        Signature::variadic(vec![], dbl, 2, dbl),
        |args| {
            let mut product = 1.0;
            for arg in args {
                product *= arg.expect_value()?.as_double()?;
            }
            ok_value(Value::Double(product))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}double-subtract"),
        Signature::fixed(vec![dbl, dbl], dbl),
        |args| ok_value(Value::Double(value(args, 0)?.as_double()? - value(args, 1)?.as_double()?)),
    );
    // IEEE-754 division: zero divisors produce ±INF or NaN, never an
    // error.
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}double-divide"),
        Signature::fixed(vec![dbl, dbl], dbl),
        |args| ok_value(Value::Double(value(args, 0)?.as_double()? / value(args, 1)?.as_double()?)),
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}double-abs"),
        Signature::fixed(vec![dbl], dbl),
        |args| ok_value(Value::Double(value(args, 0)?.as_double()?.abs())),
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}floor"),
        Signature::fixed(vec![dbl], dbl),
        |args| ok_value(Value::Double(value(args, 0)?.as_double()?.floor())),
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}round"),
        Signature::fixed(vec![dbl], dbl),
        |args| ok_value(Value::Double(round_half_even(value(args, 0)?.as_double()?))),
    );

    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}integer-to-double"),
        Signature::fixed(vec![int], dbl),
        |args| ok_value(Value::Double(value(args, 0)?.as_integer()? as f64)),
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}double-to-integer"),
        Signature::fixed(vec![dbl], int),
        |args| {
            let d = value(args, 0)?.as_double()?;
            if !d.is_finite() || d >= i64::MAX as f64 || d <= i64::MIN as f64 {
                return Err(IndeterminateError::processing(
                    "double value out of integer range",
                ));
            }
            ok_value(Value::Integer(d.trunc() as i64))
        },
    );
}

/// Round-half-even, the IEEE 754 default the XACML `round` function
/// requires.
fn round_half_even(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let floor = x.floor();
    let diff = x - floor;
    if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

// ─── Comparison ─────────────────────────────────────────────────────────

fn install_comparison(reg: &mut FunctionRegistry) {
    fn compare(
        dt: DataType,
        a: &Value,
        b: &Value,
    ) -> Result<Option<Ordering>, IndeterminateError> {
        Ok(match dt {
            DataType::Integer => Some(a.as_integer()?.cmp(&b.as_integer()?)),
            // NaN compares as neither less, equal, nor greater.
            DataType::Double => a.as_double()?.partial_cmp(&b.as_double()?),
            DataType::String => Some(a.as_string()?.cmp(b.as_string()?)),
            DataType::Time => Some(a.as_time()?.compare(b.as_time()?)),
            DataType::Date => Some(a.as_date()?.compare(b.as_date()?)),
            DataType::DateTime => Some(a.as_date_time()?.compare(b.as_date_time()?)),
            other => {
                return Err(IndeterminateError::processing(format!(
                    "no total order for {other}"
                )))
            }
        })
    }

    let suffixes: [(&str, [Option<Ordering>; 2]); 4] = [
        ("greater-than", [Some(Ordering::Greater), None]),
        (
            "greater-than-or-equal",
            [Some(Ordering::Greater), Some(Ordering::Equal)],
        ),
        ("less-than", [Some(Ordering::Less), None]),
        (
            "less-than-or-equal",
            [Some(Ordering::Less), Some(Ordering::Equal)],
        ),
    ];

    for dt in [
        DataType::Integer,
        DataType::Double,
        DataType::String,
        DataType::Time,
        DataType::Date,
        DataType::DateTime,
    ] {
        let meta = TypeMeta::value(dt);
        for (suffix, accepted) in suffixes {
            eager(
                reg,
                format!("{XACML_1_0_FUNCTION}{}-{suffix}", dt.short_name()),
                Signature::fixed(vec![meta, meta], TypeMeta::value(DataType::Boolean)),
                move |args| match compare(dt, value(args, 0)?, value(args, 1)?)? {
                    Some(ordering) => ok_bool(accepted.contains(&Some(ordering))),
                    None => ok_bool(false),
                },
            );
        }
    }
}

// ─── String ─────────────────────────────────────────────────────────────

fn install_string(reg: &mut FunctionRegistry) {
    let string = TypeMeta::value(DataType::String);
    let uri = TypeMeta::value(DataType::AnyUri);
    let int = TypeMeta::value(DataType::Integer);
    let boolean = TypeMeta::value(DataType::Boolean);

    eager(
        reg,
        format!("{XACML_2_0_FUNCTION}string-concatenate"),
        Signature::variadic(vec![], string, 2, string),
        |args| {
            let mut out = String::new();
            for arg in args {
                out.push_str(arg.expect_value()?.as_string()?);
            }
            ok_value(Value::String(out))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}string-normalize-space"),
        Signature::fixed(vec![string], string),
        |args| ok_value(Value::String(value(args, 0)?.as_string()?.trim().to_string())),
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}string-normalize-to-lower-case"),
        Signature::fixed(vec![string], string),
        |args| ok_value(Value::String(value(args, 0)?.as_string()?.to_lowercase())),
    );

    // The first argument is the fragment looked for inside the second.
    for (name, subject) in [
        ("string-starts-with", DataType::String),
        ("string-ends-with", DataType::String),
        ("string-contains", DataType::String),
        ("anyURI-starts-with", DataType::AnyUri),
        ("anyURI-ends-with", DataType::AnyUri),
        ("anyURI-contains", DataType::AnyUri),
    ] {
        let subject_meta = if subject == DataType::String { string } else { uri };
        eager(
            reg,
            format!("{XACML_3_0_FUNCTION}{name}"),
            Signature::fixed(vec![string, subject_meta], boolean),
            move |args| {
                let fragment = value(args, 0)?.as_string()?;
                let v = value(args, 1)?;
                let subject = match subject {
                    DataType::String => v.as_string()?,
                    _ => v.as_any_uri()?,
                };
                ok_bool(if name.ends_with("starts-with") {
                    subject.starts_with(fragment)
                } else if name.ends_with("ends-with") {
                    subject.ends_with(fragment)
                } else {
                    subject.contains(fragment)
                })
            },
        );
    }

    eager(
        reg,
        format!("{XACML_3_0_FUNCTION}string-substring"),
        Signature::fixed(vec![string, int, int], string),
        |args| {
            let chars: Vec<char> = value(args, 0)?.as_string()?.chars().collect();
            let begin = value(args, 1)?.as_integer()?;
            let end = value(args, 2)?.as_integer()?;
            let end = if end == -1 { chars.len() as i64 } else { end };
            if begin < 0 || end < begin || end > chars.len() as i64 {
                return Err(IndeterminateError::processing(format!(
                    "substring range {begin}..{end} out of bounds for length {}",
                    chars.len()
                )));
            }
            ok_value(Value::String(
                chars[begin as usize..end as usize].iter().collect(),
            ))
        },
    );
}

// ─── String casts ───────────────────────────────────────────────────────

fn install_casts(reg: &mut FunctionRegistry) {
    let string = TypeMeta::value(DataType::String);
    for dt in [
        DataType::Boolean,
        DataType::Integer,
        DataType::Double,
        DataType::Time,
        DataType::Date,
        DataType::DateTime,
        DataType::DayTimeDuration,
        DataType::YearMonthDuration,
        DataType::AnyUri,
        DataType::X500Name,
        DataType::Rfc822Name,
        DataType::IpAddress,
        DataType::DnsName,
    ] {
        let meta = TypeMeta::value(dt);
        eager(
            reg,
            format!("{XACML_3_0_FUNCTION}{}-from-string", dt.short_name()),
            Signature::fixed(vec![string], meta),
            move |args| Ok(Resolved::Value(Value::parse(dt, value(args, 0)?.as_string()?)?)),
        );
        eager(
            reg,
            format!("{XACML_3_0_FUNCTION}string-from-{}", dt.short_name()),
            Signature::fixed(vec![meta], string),
            |args| ok_value(Value::String(value(args, 0)?.print())),
        );
    }
}

// ─── Bag functions ──────────────────────────────────────────────────────

fn install_bag(reg: &mut FunctionRegistry) {
    for dt in DataType::ALL {
        let val = TypeMeta::value(dt);
        let bag_meta = TypeMeta::bag(dt);
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-one-and-only", dt.short_name()),
            Signature::fixed(vec![bag_meta], val),
            |args| Ok(Resolved::Value(bag(args, 0)?.one_and_only()?.clone())),
        );
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-bag-size", dt.short_name()),
            Signature::fixed(vec![bag_meta], TypeMeta::value(DataType::Integer)),
            |args| ok_value(Value::Integer(bag(args, 0)?.len() as i64)),
        );
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-is-in", dt.short_name()),
            Signature::fixed(vec![val, bag_meta], TypeMeta::value(DataType::Boolean)),
            |args| ok_bool(bag(args, 1)?.contains(value(args, 0)?)),
        );
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-bag", dt.short_name()),
            Signature::variadic(vec![], val, 0, bag_meta),
            move |args| {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.expect_value()?.clone());
                }
                Ok(Resolved::Bag(Bag::of(dt, values)?))
            },
        );
    }
}

// ─── Set functions ──────────────────────────────────────────────────────

fn install_set(reg: &mut FunctionRegistry) {
    for dt in [
        DataType::String,
        DataType::Boolean,
        DataType::Integer,
        DataType::Double,
        DataType::Time,
        DataType::Date,
        DataType::DateTime,
        DataType::AnyUri,
        DataType::HexBinary,
        DataType::Base64Binary,
        DataType::DayTimeDuration,
        DataType::YearMonthDuration,
        DataType::X500Name,
        DataType::Rfc822Name,
    ] {
        let bag_meta = TypeMeta::bag(dt);
        let boolean = TypeMeta::value(DataType::Boolean);

        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-intersection", dt.short_name()),
            Signature::fixed(vec![bag_meta, bag_meta], bag_meta),
            move |args| {
                let (a, b) = (bag(args, 0)?, bag(args, 1)?);
                let mut out: Vec<Value> = Vec::new();
                for v in a {
                    if b.contains(v) && !out.contains(v) {
                        out.push(v.clone());
                    }
                }
                Ok(Resolved::Bag(Bag::of(dt, out)?))
            },
        );
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-union", dt.short_name()),
            Signature::fixed(vec![bag_meta, bag_meta], bag_meta),
            move |args| {
                let mut out: Vec<Value> = Vec::new();
                for side in [bag(args, 0)?, bag(args, 1)?] {
                    for v in side {
                        if !out.contains(v) {
                            out.push(v.clone());
                        }
                    }
                }
                Ok(Resolved::Bag(Bag::of(dt, out)?))
            },
        );
        eager(
            reg,
            format!(
                "{XACML_1_0_FUNCTION}{}-at-least-one-member-of",
                dt.short_name()
            ),
            Signature::fixed(vec![bag_meta, bag_meta], boolean),
            |args| {
                let (a, b) = (bag(args, 0)?, bag(args, 1)?);
                ok_bool(a.iter().any(|v| b.contains(v)))
            },
        );
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-subset", dt.short_name()),
            Signature::fixed(vec![bag_meta, bag_meta], boolean),
            |args| {
                let (a, b) = (bag(args, 0)?, bag(args, 1)?);
                ok_bool(a.iter().all(|v| b.contains(v)))
            },
        );
        eager(
            reg,
            format!("{XACML_1_0_FUNCTION}{}-set-equals", dt.short_name()),
            Signature::fixed(vec![bag_meta, bag_meta], boolean),
            |args| {
                let (a, b) = (bag(args, 0)?, bag(args, 1)?);
                ok_bool(
                    a.iter().all(|v| b.contains(v)) && b.iter().all(|v| a.contains(v)),
                )
            },
        );
    }
}

// ─── Regular expressions ────────────────────────────────────────────────

/// XACML regexp matching is anchored: the pattern must match the whole
/// value, as in XML Schema.
fn regexp_match(pattern: &str, subject: &str) -> Result<bool, IndeterminateError> {
    let anchored = format!("^(?:{pattern})$");
    let compiled = Regex::new(&anchored).map_err(|e| {
        IndeterminateError::processing(format!("invalid regular expression `{pattern}`: {e}"))
    })?;
    Ok(compiled.is_match(subject))
}

fn install_regexp(reg: &mut FunctionRegistry) {
    let string = TypeMeta::value(DataType::String);
    let boolean = TypeMeta::value(DataType::Boolean);

    let families: [(DataType, &str); 6] = [
        (DataType::String, XACML_1_0_FUNCTION),
        (DataType::AnyUri, XACML_2_0_FUNCTION),
        (DataType::IpAddress, XACML_2_0_FUNCTION),
        (DataType::DnsName, XACML_2_0_FUNCTION),
        (DataType::Rfc822Name, XACML_2_0_FUNCTION),
        (DataType::X500Name, XACML_2_0_FUNCTION),
    ];
    for (dt, prefix) in families {
        eager(
            reg,
            format!("{prefix}{}-regexp-match", dt.short_name()),
            Signature::fixed(vec![string, TypeMeta::value(dt)], boolean),
            |args| {
                let pattern = value(args, 0)?.as_string()?;
                let subject = value(args, 1)?.print();
                ok_bool(regexp_match(pattern, &subject)?)
            },
        );
    }
}

// ─── Date/time arithmetic ───────────────────────────────────────────────

fn install_temporal_arithmetic(reg: &mut FunctionRegistry) {
    let date_time = TypeMeta::value(DataType::DateTime);
    let date = TypeMeta::value(DataType::Date);
    let day_time = TypeMeta::value(DataType::DayTimeDuration);
    let year_month = TypeMeta::value(DataType::YearMonthDuration);

    for negate in [false, true] {
        let op = if negate { "subtract" } else { "add" };
        eager(
            reg,
            format!("{XACML_3_0_FUNCTION}dateTime-{op}-dayTimeDuration"),
            Signature::fixed(vec![date_time, day_time], date_time),
            move |args| {
                let base = value(args, 0)?.as_date_time()?;
                let mut d = *value(args, 1)?.as_day_time_duration()?;
                if negate {
                    d = d.negated();
                }
                ok_value(Value::DateTime(base.add_day_time(&d)?))
            },
        );
        eager(
            reg,
            format!("{XACML_3_0_FUNCTION}dateTime-{op}-yearMonthDuration"),
            Signature::fixed(vec![date_time, year_month], date_time),
            move |args| {
                let base = value(args, 0)?.as_date_time()?;
                let mut d = *value(args, 1)?.as_year_month_duration()?;
                if negate {
                    d = d.negated();
                }
                ok_value(Value::DateTime(base.add_year_month(&d)?))
            },
        );
        eager(
            reg,
            format!("{XACML_3_0_FUNCTION}date-{op}-yearMonthDuration"),
            Signature::fixed(vec![date, year_month], date),
            move |args| {
                let base = value(args, 0)?.as_date()?;
                let mut d = *value(args, 1)?.as_year_month_duration()?;
                if negate {
                    d = d.negated();
                }
                ok_value(Value::Date(base.add_year_month(&d)?))
            },
        );
    }
}

// ─── Name matching ──────────────────────────────────────────────────────

fn install_name_matching(reg: &mut FunctionRegistry) {
    let string = TypeMeta::value(DataType::String);
    let boolean = TypeMeta::value(DataType::Boolean);

    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}rfc822Name-match"),
        Signature::fixed(
            vec![string, TypeMeta::value(DataType::Rfc822Name)],
            boolean,
        ),
        |args| {
            let pattern = value(args, 0)?.as_string()?;
            ok_bool(value(args, 1)?.as_rfc822_name()?.matches(pattern))
        },
    );
    eager(
        reg,
        format!("{XACML_1_0_FUNCTION}x500Name-match"),
        Signature::fixed(
            vec![
                TypeMeta::value(DataType::X500Name),
                TypeMeta::value(DataType::X500Name),
            ],
            boolean,
        ),
        |args| {
            let first = value(args, 0)?.as_x500_name()?;
            let second = value(args, 1)?.as_x500_name()?;
            ok_bool(first.is_suffix_of(second))
        },
    );
}

// ─── Higher-order ───────────────────────────────────────────────────────

fn install_higher_order(reg: &mut FunctionRegistry) {
    let boolean = TypeMeta::value(DataType::Boolean);
    let ops: [(&str, HigherOrderOp); 7] = [
        ("any-of", HigherOrderOp::AnyOf),
        ("all-of", HigherOrderOp::AllOf),
        ("any-of-any", HigherOrderOp::AnyOfAny),
        ("all-of-any", HigherOrderOp::AllOfAny),
        ("any-of-all", HigherOrderOp::AnyOfAll),
        ("all-of-all", HigherOrderOp::AllOfAll),
        ("map", HigherOrderOp::Map),
    ];
    for (name, op) in ops {
        let returns = if matches!(op, HigherOrderOp::Map) {
            TypeMeta::bag(DataType::String)
        } else {
            boolean
        };
        reg.register(FunctionDef::new(
            format!("{XACML_1_0_FUNCTION}{name}"),
            Signature::fixed(vec![], returns),
            FunctionKind::HigherOrder(op),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use crate::expression::Expression;

    fn call(name: &str, args: Vec<Value>) -> Result<Resolved, IndeterminateError> {
        let reg = FunctionRegistry::standard();
        let f = reg.get(name).unwrap_or_else(|| panic!("missing function {name}"));
        let exprs: Vec<Expression> = args.into_iter().map(Expression::Literal).collect();
        let expr = Expression::apply(f, exprs).unwrap();
        expr.evaluate(&mut EvaluationContext::detached())
    }

    fn call_ok(name: &str, args: Vec<Value>) -> Value {
        call(name, args)
            .unwrap()
            .expect_value()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(call_ok("integer-add", vec![Value::Integer(2), Value::Integer(3)]), Value::Integer(5));
        assert_eq!(
            call_ok("integer-subtract", vec![Value::Integer(17), Value::Integer(10)]),
            Value::Integer(7)
        );
        assert_eq!(
            call_ok("integer-divide", vec![Value::Integer(-7), Value::Integer(2)]),
            Value::Integer(-3) // truncation toward zero
        );
        assert_eq!(
            call_ok("integer-mod", vec![Value::Integer(-7), Value::Integer(2)]),
            Value::Integer(-1) // sign follows the dividend
        );
        assert!(call("integer-divide", vec![Value::Integer(1), Value::Integer(0)]).is_err());
        assert!(call("integer-add", vec![Value::Integer(i64::MAX), Value::Integer(1)]).is_err());
    }

    #[test]
    fn test_double_division_never_errors() {
        assert_eq!(
            call_ok("double-divide", vec![Value::Double(1.0), Value::Double(0.0)]),
            Value::Double(f64::INFINITY)
        );
        let nan = call_ok("double-divide", vec![Value::Double(0.0), Value::Double(0.0)]);
        assert!(matches!(nan, Value::Double(d) if d.is_nan()));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(call_ok("round", vec![Value::Double(2.5)]), Value::Double(2.0));
        assert_eq!(call_ok("round", vec![Value::Double(3.5)]), Value::Double(4.0));
        assert_eq!(call_ok("round", vec![Value::Double(2.3)]), Value::Double(2.0));
        assert_eq!(call_ok("floor", vec![Value::Double(2.9)]), Value::Double(2.0));
    }

    #[test]
    fn test_double_nan_comparisons_are_false() {
        assert_eq!(
            call_ok(
                "double-greater-than",
                vec![Value::Double(f64::NAN), Value::Double(1.0)]
            ),
            Value::Boolean(false)
        );
        assert_eq!(
            call_ok(
                "double-less-than-or-equal",
                vec![Value::Double(f64::NAN), Value::Double(1.0)]
            ),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            call_ok(
                "string-concatenate",
                vec![Value::String("foo".into()), Value::String("bar".into())]
            ),
            Value::String("foobar".into())
        );
        assert_eq!(
            call_ok("string-normalize-space", vec![Value::String("  x  ".into())]),
            Value::String("x".into())
        );
        assert_eq!(
            call_ok(
                "string-starts-with",
                vec![Value::String("he".into()), Value::String("hello".into())]
            ),
            Value::Boolean(true)
        );
        assert_eq!(
            call_ok(
                "string-substring",
                vec![Value::String("hello".into()), Value::Integer(1), Value::Integer(3)]
            ),
            Value::String("el".into())
        );
        assert_eq!(
            call_ok(
                "string-substring",
                vec![Value::String("hello".into()), Value::Integer(2), Value::Integer(-1)]
            ),
            Value::String("llo".into())
        );
        assert!(call(
            "string-substring",
            vec![Value::String("hi".into()), Value::Integer(0), Value::Integer(5)]
        )
        .is_err());
    }

    #[test]
    fn test_casts_round_trip() {
        assert_eq!(
            call_ok("integer-from-string", vec![Value::String("42".into())]),
            Value::Integer(42)
        );
        assert_eq!(
            call_ok("string-from-integer", vec![Value::Integer(42)]),
            Value::String("42".into())
        );
        assert!(call("integer-from-string", vec![Value::String("nope".into())]).is_err());
    }

    #[test]
    fn test_set_functions() {
        let reg = FunctionRegistry::standard();
        let union = reg.get("string-union").unwrap();
        let a = Bag::of(
            DataType::String,
            vec![Value::String("a".into()), Value::String("b".into())],
        )
        .unwrap();
        let b = Bag::of(
            DataType::String,
            vec![Value::String("b".into()), Value::String("c".into())],
        )
        .unwrap();
        let expr = Expression::apply(
            union,
            vec![Expression::BagLiteral(a.clone()), Expression::BagLiteral(b.clone())],
        )
        .unwrap();
        let result = expr.evaluate(&mut EvaluationContext::detached()).unwrap();
        assert_eq!(result.expect_bag().unwrap().len(), 3);

        let subset = reg.get("string-subset").unwrap();
        let expr = Expression::apply(
            subset,
            vec![
                Expression::BagLiteral(
                    Bag::of(DataType::String, vec![Value::String("b".into())]).unwrap(),
                ),
                Expression::BagLiteral(b),
            ],
        )
        .unwrap();
        assert_eq!(
            expr.evaluate(&mut EvaluationContext::detached()).unwrap(),
            Resolved::Value(Value::Boolean(true))
        );
    }

    #[test]
    fn test_regexp_match_is_anchored() {
        assert_eq!(
            call_ok(
                "string-regexp-match",
                vec![Value::String("ab*".into()), Value::String("abbb".into())]
            ),
            Value::Boolean(true)
        );
        // Unanchored substring matches are not enough.
        assert_eq!(
            call_ok(
                "string-regexp-match",
                vec![Value::String("b+".into()), Value::String("abbba".into())]
            ),
            Value::Boolean(false)
        );
        assert!(call(
            "string-regexp-match",
            vec![Value::String("(".into()), Value::String("x".into())]
        )
        .is_err());
    }

    #[test]
    fn test_temporal_arithmetic_functions() {
        let dt = Value::parse(DataType::DateTime, "2002-09-24T09:30:00Z").unwrap();
        let dur = Value::parse(DataType::DayTimeDuration, "PT30M").unwrap();
        assert_eq!(
            call_ok("dateTime-add-dayTimeDuration", vec![dt.clone(), dur.clone()]),
            Value::parse(DataType::DateTime, "2002-09-24T10:00:00Z").unwrap()
        );
        assert_eq!(
            call_ok("dateTime-subtract-dayTimeDuration", vec![dt, dur]),
            Value::parse(DataType::DateTime, "2002-09-24T09:00:00Z").unwrap()
        );
        let date = Value::parse(DataType::Date, "2004-01-31").unwrap();
        let months = Value::parse(DataType::YearMonthDuration, "P1M").unwrap();
        assert_eq!(
            call_ok("date-add-yearMonthDuration", vec![date, months]),
            Value::parse(DataType::Date, "2004-02-29").unwrap()
        );
    }

    #[test]
    fn test_rfc822_and_x500_match() {
        let name = Value::parse(DataType::Rfc822Name, "Anderson@sun.com").unwrap();
        assert_eq!(
            call_ok(
                "rfc822Name-match",
                vec![Value::String("sun.com".into()), name]
            ),
            Value::Boolean(true)
        );
        let whole =
            Value::parse(DataType::X500Name, "cn=Steve Kille,o=Isode Limited,c=GB").unwrap();
        let suffix = Value::parse(DataType::X500Name, "o=Isode Limited,c=GB").unwrap();
        assert_eq!(
            call_ok("x500Name-match", vec![suffix, whole]),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_one_and_only_cardinality() {
        let reg = FunctionRegistry::standard();
        let one = reg.get("integer-one-and-only").unwrap();
        let good = Expression::apply(
            one.clone(),
            vec![Expression::BagLiteral(Bag::singleton(Value::Integer(9)))],
        )
        .unwrap();
        assert_eq!(
            good.evaluate(&mut EvaluationContext::detached()).unwrap(),
            Resolved::Value(Value::Integer(9))
        );
        let empty = Expression::apply(
            one,
            vec![Expression::BagLiteral(Bag::empty(DataType::Integer))],
        )
        .unwrap();
        assert!(empty.evaluate(&mut EvaluationContext::detached()).is_err());
    }
}
