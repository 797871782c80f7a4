//! Attribute value algebra: the closed set of primitive XACML datatypes,
//! bags over them, and the attribute keys used to address request
//! attributes. Values are immutable; equality is value-equality.

pub mod names;
pub mod temporal;

use base64ct::{Base64, Encoding};

use crate::errors::IndeterminateError;
use names::{DnsName, IpAddressValue, PathExpression, Rfc822Name, X500Name};
use temporal::{DateTimeValue, DateValue, DayTimeDuration, TimeValue, YearMonthDuration};

/// Well-known XACML category and attribute identifiers.
pub mod ids {
    pub const SUBJECT_CATEGORY: &str =
        "urn:oasis:names:tc:xacml:1.0:subject-category:access-subject";
    pub const RESOURCE_CATEGORY: &str =
        "urn:oasis:names:tc:xacml:3.0:attribute-category:resource";
    pub const ACTION_CATEGORY: &str = "urn:oasis:names:tc:xacml:3.0:attribute-category:action";
    pub const ENVIRONMENT_CATEGORY: &str =
        "urn:oasis:names:tc:xacml:3.0:attribute-category:environment";

    pub const SUBJECT_ID: &str = "urn:oasis:names:tc:xacml:1.0:subject:subject-id";
    pub const RESOURCE_ID: &str = "urn:oasis:names:tc:xacml:1.0:resource:resource-id";
    pub const ACTION_ID: &str = "urn:oasis:names:tc:xacml:1.0:action:action-id";
    pub const CURRENT_TIME: &str = "urn:oasis:names:tc:xacml:1.0:environment:current-time";
    pub const CURRENT_DATE: &str = "urn:oasis:names:tc:xacml:1.0:environment:current-date";
    pub const CURRENT_DATETIME: &str =
        "urn:oasis:names:tc:xacml:1.0:environment:current-dateTime";

    /// Resolve a category given either a full URI or one of the short names
    /// used in policy documents (`subject`, `resource`, `action`,
    /// `environment`).
    pub fn resolve_category(name: &str) -> String {
        match name {
            "subject" => SUBJECT_CATEGORY.to_string(),
            "resource" => RESOURCE_CATEGORY.to_string(),
            "action" => ACTION_CATEGORY.to_string(),
            "environment" => ENVIRONMENT_CATEGORY.to_string(),
            uri => uri.to_string(),
        }
    }
}

// ─── Datatypes ──────────────────────────────────────────────────────────

/// The closed set of primitive datatypes the engine recognizes. Each has a
/// URI identifier; bag-ness is tracked separately (see `TypeMeta`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Boolean,
    Integer,
    Double,
    Time,
    Date,
    DateTime,
    DayTimeDuration,
    YearMonthDuration,
    AnyUri,
    HexBinary,
    Base64Binary,
    Rfc822Name,
    X500Name,
    IpAddress,
    DnsName,
    XPathExpression,
}

impl DataType {
    pub fn uri(self) -> &'static str {
        match self {
            DataType::String => "http://www.w3.org/2001/XMLSchema#string",
            DataType::Boolean => "http://www.w3.org/2001/XMLSchema#boolean",
            DataType::Integer => "http://www.w3.org/2001/XMLSchema#integer",
            DataType::Double => "http://www.w3.org/2001/XMLSchema#double",
            DataType::Time => "http://www.w3.org/2001/XMLSchema#time",
            DataType::Date => "http://www.w3.org/2001/XMLSchema#date",
            DataType::DateTime => "http://www.w3.org/2001/XMLSchema#dateTime",
            DataType::DayTimeDuration => "http://www.w3.org/2001/XMLSchema#dayTimeDuration",
            DataType::YearMonthDuration => "http://www.w3.org/2001/XMLSchema#yearMonthDuration",
            DataType::AnyUri => "http://www.w3.org/2001/XMLSchema#anyURI",
            DataType::HexBinary => "http://www.w3.org/2001/XMLSchema#hexBinary",
            DataType::Base64Binary => "http://www.w3.org/2001/XMLSchema#base64Binary",
            DataType::Rfc822Name => "urn:oasis:names:tc:xacml:1.0:data-type:rfc822Name",
            DataType::X500Name => "urn:oasis:names:tc:xacml:1.0:data-type:x500Name",
            DataType::IpAddress => "urn:oasis:names:tc:xacml:2.0:data-type:ipAddress",
            DataType::DnsName => "urn:oasis:names:tc:xacml:2.0:data-type:dnsName",
            DataType::XPathExpression => {
                "urn:oasis:names:tc:xacml:3.0:data-type:xpathExpression"
            }
        }
    }

    /// Short name used in policy documents and log output.
    pub fn short_name(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Double => "double",
            DataType::Time => "time",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::DayTimeDuration => "dayTimeDuration",
            DataType::YearMonthDuration => "yearMonthDuration",
            DataType::AnyUri => "anyURI",
            DataType::HexBinary => "hexBinary",
            DataType::Base64Binary => "base64Binary",
            DataType::Rfc822Name => "rfc822Name",
            DataType::X500Name => "x500Name",
            DataType::IpAddress => "ipAddress",
            DataType::DnsName => "dnsName",
            DataType::XPathExpression => "xpathExpression",
        }
    }

    pub const ALL: [DataType; 17] = [
        DataType::String,
        DataType::Boolean,
        DataType::Integer,
        DataType::Double,
        DataType::Time,
        DataType::Date,
        DataType::DateTime,
        DataType::DayTimeDuration,
        DataType::YearMonthDuration,
        DataType::AnyUri,
        DataType::HexBinary,
        DataType::Base64Binary,
        DataType::Rfc822Name,
        DataType::X500Name,
        DataType::IpAddress,
        DataType::DnsName,
        DataType::XPathExpression,
    ];

    /// Lookup by full URI or short name.
    pub fn resolve(name: &str) -> Option<DataType> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.uri() == name || dt.short_name() == name)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

// ─── Values ─────────────────────────────────────────────────────────────

/// A primitive attribute value. One variant per datatype; equality is
/// value-equality with the per-datatype semantics documented on the leaf
/// types (`names`, `temporal`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Time(TimeValue),
    Date(DateValue),
    DateTime(DateTimeValue),
    DayTimeDuration(DayTimeDuration),
    YearMonthDuration(YearMonthDuration),
    /// Space-permissive per XML Schema anyURI; deliberately NOT a platform
    /// URI type, which rejects lexically valid xs:anyURI values.
    AnyUri(String),
    HexBinary(Vec<u8>),
    Base64Binary(Vec<u8>),
    Rfc822Name(Rfc822Name),
    X500Name(X500Name),
    IpAddress(IpAddressValue),
    DnsName(DnsName),
    XPathExpression(PathExpression),
}

impl Value {
    pub fn datatype(&self) -> DataType {
        match self {
            Value::String(_) => DataType::String,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Double(_) => DataType::Double,
            Value::Time(_) => DataType::Time,
            Value::Date(_) => DataType::Date,
            Value::DateTime(_) => DataType::DateTime,
            Value::DayTimeDuration(_) => DataType::DayTimeDuration,
            Value::YearMonthDuration(_) => DataType::YearMonthDuration,
            Value::AnyUri(_) => DataType::AnyUri,
            Value::HexBinary(_) => DataType::HexBinary,
            Value::Base64Binary(_) => DataType::Base64Binary,
            Value::Rfc822Name(_) => DataType::Rfc822Name,
            Value::X500Name(_) => DataType::X500Name,
            Value::IpAddress(_) => DataType::IpAddress,
            Value::DnsName(_) => DataType::DnsName,
            Value::XPathExpression(_) => DataType::XPathExpression,
        }
    }

    /// Parse a value from its lexical form. Fails with a syntax-error
    /// status on invalid input; the loader maps this to a load error.
    pub fn parse(datatype: DataType, lexical: &str) -> Result<Value, IndeterminateError> {
        let bad = |msg: &str| {
            IndeterminateError::syntax(format!(
                "invalid {} literal `{lexical}`: {msg}",
                datatype.short_name()
            ))
        };
        match datatype {
            DataType::String => Ok(Value::String(lexical.to_string())),
            DataType::Boolean => match lexical {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(bad("expected true/false/1/0")),
            },
            DataType::Integer => lexical
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| bad(&e.to_string())),
            DataType::Double => parse_double(lexical).map(Value::Double).map_err(bad),
            DataType::Time => TimeValue::parse(lexical).map(Value::Time).map_err(bad),
            DataType::Date => DateValue::parse(lexical).map(Value::Date).map_err(bad),
            DataType::DateTime => DateTimeValue::parse(lexical)
                .map(Value::DateTime)
                .map_err(bad),
            DataType::DayTimeDuration => DayTimeDuration::parse(lexical)
                .map(Value::DayTimeDuration)
                .map_err(bad),
            DataType::YearMonthDuration => YearMonthDuration::parse(lexical)
                .map(Value::YearMonthDuration)
                .map_err(bad),
            DataType::AnyUri => Ok(Value::AnyUri(lexical.to_string())),
            DataType::HexBinary => parse_hex(lexical).map(Value::HexBinary).map_err(bad),
            DataType::Base64Binary => {
                let compact: String = lexical.chars().filter(|c| !c.is_whitespace()).collect();
                Base64::decode_vec(&compact)
                    .map(Value::Base64Binary)
                    .map_err(|e| bad(&e.to_string()))
            }
            DataType::Rfc822Name => Rfc822Name::parse(lexical)
                .map(Value::Rfc822Name)
                .map_err(bad),
            DataType::X500Name => X500Name::parse(lexical).map(Value::X500Name).map_err(bad),
            DataType::IpAddress => IpAddressValue::parse(lexical)
                .map(Value::IpAddress)
                .map_err(bad),
            DataType::DnsName => DnsName::parse(lexical).map(Value::DnsName).map_err(bad),
            DataType::XPathExpression => Ok(Value::XPathExpression(PathExpression {
                category: None,
                path: lexical.to_string(),
            })),
        }
    }

    /// Canonical lexical form; `parse(print(v))` is semantically equal to
    /// `v` for every datatype.
    pub fn print(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Double(d) => print_double(*d),
            Value::Time(t) => t.print(),
            Value::Date(d) => d.print(),
            Value::DateTime(dt) => dt.print(),
            Value::DayTimeDuration(d) => d.print(),
            Value::YearMonthDuration(d) => d.print(),
            Value::AnyUri(u) => u.clone(),
            Value::HexBinary(bytes) => bytes.iter().map(|b| format!("{b:02X}")).collect(),
            Value::Base64Binary(bytes) => Base64::encode_string(bytes),
            Value::Rfc822Name(n) => n.print(),
            Value::X500Name(n) => n.print(),
            Value::IpAddress(a) => a.print(),
            Value::DnsName(n) => n.print(),
            Value::XPathExpression(p) => p.path.clone(),
        }
    }

    fn type_confusion(&self, expected: DataType) -> IndeterminateError {
        IndeterminateError::processing(format!(
            "internal type confusion: expected {expected}, got {}",
            self.datatype()
        ))
    }

    pub fn as_string(&self) -> Result<&str, IndeterminateError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.type_confusion(DataType::String)),
        }
    }

    pub fn as_boolean(&self) -> Result<bool, IndeterminateError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(other.type_confusion(DataType::Boolean)),
        }
    }

    pub fn as_integer(&self) -> Result<i64, IndeterminateError> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(other.type_confusion(DataType::Integer)),
        }
    }

    pub fn as_double(&self) -> Result<f64, IndeterminateError> {
        match self {
            Value::Double(d) => Ok(*d),
            other => Err(other.type_confusion(DataType::Double)),
        }
    }

    pub fn as_time(&self) -> Result<&TimeValue, IndeterminateError> {
        match self {
            Value::Time(t) => Ok(t),
            other => Err(other.type_confusion(DataType::Time)),
        }
    }

    pub fn as_date(&self) -> Result<&DateValue, IndeterminateError> {
        match self {
            Value::Date(d) => Ok(d),
            other => Err(other.type_confusion(DataType::Date)),
        }
    }

    pub fn as_date_time(&self) -> Result<&DateTimeValue, IndeterminateError> {
        match self {
            Value::DateTime(dt) => Ok(dt),
            other => Err(other.type_confusion(DataType::DateTime)),
        }
    }

    pub fn as_day_time_duration(&self) -> Result<&DayTimeDuration, IndeterminateError> {
        match self {
            Value::DayTimeDuration(d) => Ok(d),
            other => Err(other.type_confusion(DataType::DayTimeDuration)),
        }
    }

    pub fn as_year_month_duration(&self) -> Result<&YearMonthDuration, IndeterminateError> {
        match self {
            Value::YearMonthDuration(d) => Ok(d),
            other => Err(other.type_confusion(DataType::YearMonthDuration)),
        }
    }

    pub fn as_any_uri(&self) -> Result<&str, IndeterminateError> {
        match self {
            Value::AnyUri(u) => Ok(u),
            other => Err(other.type_confusion(DataType::AnyUri)),
        }
    }

    pub fn as_rfc822_name(&self) -> Result<&Rfc822Name, IndeterminateError> {
        match self {
            Value::Rfc822Name(n) => Ok(n),
            other => Err(other.type_confusion(DataType::Rfc822Name)),
        }
    }

    pub fn as_x500_name(&self) -> Result<&X500Name, IndeterminateError> {
        match self {
            Value::X500Name(n) => Ok(n),
            other => Err(other.type_confusion(DataType::X500Name)),
        }
    }

    pub fn as_path_expression(&self) -> Result<&PathExpression, IndeterminateError> {
        match self {
            Value::XPathExpression(p) => Ok(p),
            other => Err(other.type_confusion(DataType::XPathExpression)),
        }
    }
}

fn parse_double(lexical: &str) -> Result<f64, &'static str> {
    let s = lexical.trim();
    match s {
        "INF" | "+INF" => return Ok(f64::INFINITY),
        "-INF" => return Ok(f64::NEG_INFINITY),
        "NaN" => return Ok(f64::NAN),
        _ => {}
    }
    // Reject the alphabetic spellings Rust accepts but XML Schema does not
    // (e.g. "infinity", "nan").
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return Err("not a valid xs:double");
    }
    s.parse::<f64>().map_err(|_| "not a valid xs:double")
}

fn print_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d == f64::INFINITY {
        "INF".to_string()
    } else if d == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        format!("{d}")
    }
}

fn parse_hex(lexical: &str) -> Result<Vec<u8>, &'static str> {
    let s = lexical.trim();
    if s.len() % 2 != 0 {
        return Err("odd number of hex digits");
    }
    let digit = |c: u8| -> Result<u8, &'static str> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err("not a hex digit"),
        }
    };
    s.as_bytes()
        .chunks(2)
        .map(|pair| Ok(digit(pair[0])? << 4 | digit(pair[1])?))
        .collect()
}

// ─── Bags ───────────────────────────────────────────────────────────────

/// An unordered multiset of values of a single primitive datatype. Empty
/// bags are valid; a bag never contains another bag.
#[derive(Debug, Clone)]
pub struct Bag {
    datatype: DataType,
    values: Vec<Value>,
}

impl Bag {
    pub fn empty(datatype: DataType) -> Self {
        Self {
            datatype,
            values: Vec::new(),
        }
    }

    pub fn singleton(value: Value) -> Self {
        Self {
            datatype: value.datatype(),
            values: vec![value],
        }
    }

    pub fn of(
        datatype: DataType,
        values: Vec<Value>,
    ) -> Result<Self, IndeterminateError> {
        for v in &values {
            if v.datatype() != datatype {
                return Err(IndeterminateError::processing(format!(
                    "bag of {datatype} cannot hold a {} value",
                    v.datatype()
                )));
            }
        }
        Ok(Self { datatype, values })
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// The single member of a one-element bag; any other size is a
    /// processing error (the `*-one-and-only` contract).
    pub fn one_and_only(&self) -> Result<&Value, IndeterminateError> {
        if self.values.len() == 1 {
            Ok(&self.values[0])
        } else {
            Err(IndeterminateError::processing(format!(
                "expected a bag of exactly one {}, got {} values",
                self.datatype,
                self.values.len()
            )))
        }
    }

    /// Merge another bag of the same datatype into this one.
    pub fn extend(&mut self, other: &Bag) {
        self.values.extend(other.values.iter().cloned());
    }

    fn count_of(&self, value: &Value) -> usize {
        self.values.iter().filter(|v| *v == value).count()
    }
}

/// Multiset equality: same datatype and same per-value multiplicities,
/// independent of insertion order.
impl PartialEq for Bag {
    fn eq(&self, other: &Self) -> bool {
        if self.datatype != other.datatype || self.values.len() != other.values.len() {
            return false;
        }
        self.values
            .iter()
            .all(|v| self.count_of(v) == other.count_of(v))
    }
}

impl<'a> IntoIterator for &'a Bag {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

// ─── Attribute keys ─────────────────────────────────────────────────────

/// Addresses one named attribute in a request: category, id, datatype, and
/// optional issuer. Issuer absence is a distinct value, not a wildcard;
/// lenient matching of absent issuers is handled by the evaluation
/// context, not by key equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub category: String,
    pub attribute_id: String,
    pub datatype: DataType,
    pub issuer: Option<String>,
}

impl AttributeKey {
    pub fn new(
        category: impl Into<String>,
        attribute_id: impl Into<String>,
        datatype: DataType,
    ) -> Self {
        Self {
            category: category.into(),
            attribute_id: attribute_id.into(),
            datatype,
            issuer: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }
}

impl std::fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}:{}", self.category, self.attribute_id, self.datatype)?;
        if let Some(issuer) = &self.issuer {
            write!(f, "@{issuer}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(dt: DataType, s: &str) -> Value {
        Value::parse(dt, s).unwrap()
    }

    #[test]
    fn test_datatype_resolve_by_uri_and_short_name() {
        assert_eq!(
            DataType::resolve("http://www.w3.org/2001/XMLSchema#string"),
            Some(DataType::String)
        );
        assert_eq!(DataType::resolve("dateTime"), Some(DataType::DateTime));
        assert_eq!(DataType::resolve("no-such-type"), None);
    }

    #[test]
    fn test_parse_boolean_lexical_forms() {
        assert_eq!(v(DataType::Boolean, "true"), Value::Boolean(true));
        assert_eq!(v(DataType::Boolean, "1"), Value::Boolean(true));
        assert_eq!(v(DataType::Boolean, "0"), Value::Boolean(false));
        assert!(Value::parse(DataType::Boolean, "yes").is_err());
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(v(DataType::Integer, "42"), Value::Integer(42));
        assert_eq!(v(DataType::Integer, "-7"), Value::Integer(-7));
        assert_eq!(v(DataType::Integer, "+5"), Value::Integer(5));
        assert!(Value::parse(DataType::Integer, "1.5").is_err());
    }

    #[test]
    fn test_parse_double_specials() {
        assert_eq!(v(DataType::Double, "INF"), Value::Double(f64::INFINITY));
        assert_eq!(v(DataType::Double, "-INF"), Value::Double(f64::NEG_INFINITY));
        assert!(matches!(v(DataType::Double, "NaN"), Value::Double(d) if d.is_nan()));
        assert!(Value::parse(DataType::Double, "infinity").is_err());
        assert_eq!(v(DataType::Double, "1.5e3"), Value::Double(1500.0));
    }

    #[test]
    fn test_hex_binary_round_trip() {
        let val = v(DataType::HexBinary, "0afF");
        assert_eq!(val, Value::HexBinary(vec![0x0a, 0xff]));
        assert_eq!(val.print(), "0AFF");
        assert_eq!(Value::parse(DataType::HexBinary, &val.print()).unwrap(), val);
        assert!(Value::parse(DataType::HexBinary, "abc").is_err());
        assert!(Value::parse(DataType::HexBinary, "zz").is_err());
    }

    #[test]
    fn test_base64_binary_round_trip() {
        let val = v(DataType::Base64Binary, "aGVsbG8=");
        assert_eq!(val, Value::Base64Binary(b"hello".to_vec()));
        assert_eq!(Value::parse(DataType::Base64Binary, &val.print()).unwrap(), val);
    }

    #[test]
    fn test_any_uri_is_space_permissive() {
        // xs:anyURI allows spaces; a platform URI type would reject this.
        let val = v(DataType::AnyUri, "http://example.com/a b");
        assert_eq!(val.print(), "http://example.com/a b");
    }

    #[test]
    fn test_round_trip_all_scalar_types() {
        let samples = [
            (DataType::String, "J. Hibbert"),
            (DataType::Boolean, "true"),
            (DataType::Integer, "-12"),
            (DataType::Double, "2.5"),
            (DataType::Time, "09:30:15"),
            (DataType::Date, "2002-09-24"),
            (DataType::DateTime, "2002-09-24T09:30:15Z"),
            (DataType::DayTimeDuration, "P1DT2H"),
            (DataType::YearMonthDuration, "P1Y2M"),
            (DataType::AnyUri, "http://example.com/x"),
            (DataType::HexBinary, "DEADBEEF"),
            (DataType::Base64Binary, "aGVsbG8="),
            (DataType::Rfc822Name, "Anderson@sun.com"),
            (DataType::X500Name, "cn=Steve Kille,o=Isode Limited,c=GB"),
            (DataType::IpAddress, "10.0.0.1"),
            (DataType::DnsName, "example.com"),
        ];
        for (dt, lexical) in samples {
            let parsed = Value::parse(dt, lexical)
                .unwrap_or_else(|e| panic!("parse {lexical} as {dt}: {e}"));
            let reparsed = Value::parse(dt, &parsed.print()).unwrap();
            assert_eq!(parsed, reparsed, "round trip for {dt}");
        }
    }

    #[test]
    fn test_bag_multiset_equality() {
        let a = Bag::of(
            DataType::Integer,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(1)],
        )
        .unwrap();
        let b = Bag::of(
            DataType::Integer,
            vec![Value::Integer(2), Value::Integer(1), Value::Integer(1)],
        )
        .unwrap();
        let c = Bag::of(
            DataType::Integer,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(2)],
        )
        .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Bag::empty(DataType::Integer), Bag::empty(DataType::Integer));
        assert_ne!(Bag::empty(DataType::Integer), Bag::empty(DataType::String));
    }

    #[test]
    fn test_bag_rejects_mixed_types() {
        assert!(Bag::of(
            DataType::Integer,
            vec![Value::Integer(1), Value::String("x".into())]
        )
        .is_err());
    }

    #[test]
    fn test_one_and_only() {
        let one = Bag::singleton(Value::Integer(5));
        assert_eq!(one.one_and_only().unwrap(), &Value::Integer(5));
        assert!(Bag::empty(DataType::Integer).one_and_only().is_err());
        let two = Bag::of(DataType::Integer, vec![Value::Integer(1), Value::Integer(2)])
            .unwrap();
        assert!(two.one_and_only().is_err());
    }

    #[test]
    fn test_attribute_key_issuer_absence_is_distinct() {
        let bare = AttributeKey::new(ids::SUBJECT_CATEGORY, ids::SUBJECT_ID, DataType::String);
        let issued = bare.clone().with_issuer("idp.example.com");
        assert_ne!(bare, issued);
    }
}
