// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fully resolved type descriptions.
//!
//! After resolution every [`Typedef`] carries literal-only range/length
//! intervals, accumulated patterns, numbered enum/bit members and resolved
//! leafref / identityref targets, so value checking never walks the
//! ancestor chain again.

use core::fmt;

use base64::Engine as _;
use regex::Regex;

use crate::{
    error::{ErrorKind, RpcError},
    yang::schema::{IdentityId, NodeId, SchemaContext, TypedefId},
    xpath,
};

/// The concrete kind at the bottom of a typedef chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Decimal64,
    Bool,
    String,
    Binary,
    Enumeration,
    Bits,
    Empty,
    Union,
    Leafref,
    InstanceIdentifier,
    Identityref,
}

impl BaseKind {
    /// Maps a built-in YANG type name, if `name` is one.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "decimal64" => Self::Decimal64,
            "boolean" => Self::Bool,
            "string" => Self::String,
            "binary" => Self::Binary,
            "enumeration" => Self::Enumeration,
            "bits" => Self::Bits,
            "empty" => Self::Empty,
            "union" => Self::Union,
            "leafref" => Self::Leafref,
            "instance-identifier" => Self::InstanceIdentifier,
            "identityref" => Self::Identityref,
            _ => return None,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, Self::Decimal64)
    }

    /// Built-in `[lo, hi]` bounds for the integer kinds.
    pub fn integer_bounds(&self) -> Option<(i128, i128)> {
        Some(match self {
            Self::Int8 => (i8::MIN as i128, i8::MAX as i128),
            Self::Int16 => (i16::MIN as i128, i16::MAX as i128),
            Self::Int32 => (i32::MIN as i128, i32::MAX as i128),
            Self::Int64 => (i64::MIN as i128, i64::MAX as i128),
            Self::Uint8 => (0, u8::MAX as i128),
            Self::Uint16 => (0, u16::MAX as i128),
            Self::Uint32 => (0, u32::MAX as i128),
            Self::Uint64 => (0, u64::MAX as i128),
            _ => return None,
        })
    }
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Decimal64 => "decimal64",
            Self::Bool => "boolean",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Enumeration => "enumeration",
            Self::Bits => "bits",
            Self::Empty => "empty",
            Self::Union => "union",
            Self::Leafref => "leafref",
            Self::InstanceIdentifier => "instance-identifier",
            Self::Identityref => "identityref",
        })
    }
}

/// One interval endpoint; infinities exist only for decimal64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RangeVal {
    NegInf,
    /// Integers verbatim; decimal64 scaled by `10^fraction_digits`;
    /// lengths as non-negative integers.
    Num(i128),
    PosInf,
}

/// A closed interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: RangeVal,
    pub hi: RangeVal,
}

impl Interval {
    pub fn contains(&self, v: i128) -> bool {
        RangeVal::Num(v) >= self.lo && RangeVal::Num(v) <= self.hi
    }

    /// True when `self` fits entirely inside `outer`.
    pub fn within(&self, outer: &Interval) -> bool {
        self.lo >= outer.lo && self.hi <= outer.hi
    }
}

/// A normalized interval list plus violation-report decoration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeDescriptor {
    /// Sorted, pairwise disjoint intervals.
    pub intervals: Vec<Interval>,
    pub error_app_tag: Option<String>,
    pub error_message: Option<String>,
}

impl RangeDescriptor {
    pub fn single(lo: i128, hi: i128) -> Self {
        Self {
            intervals: vec![Interval {
                lo: RangeVal::Num(lo),
                hi: RangeVal::Num(hi),
            }],
            error_app_tag: None,
            error_message: None,
        }
    }

    pub fn accepts(&self, v: i128) -> bool {
        self.intervals.iter().any(|iv| iv.contains(v))
    }

    /// Lowest endpoint across all intervals.
    pub fn min_val(&self) -> Option<RangeVal> {
        self.intervals.first().map(|iv| iv.lo)
    }

    /// Highest endpoint across all intervals.
    pub fn max_val(&self) -> Option<RangeVal> {
        self.intervals.last().map(|iv| iv.hi)
    }

    /// True when every interval of `self` fits in some interval of `outer`.
    pub fn subset_of(&self, outer: &RangeDescriptor) -> bool {
        self.intervals
            .iter()
            .all(|iv| outer.intervals.iter().any(|o| iv.within(o)))
    }

    /// Builds the `invalid-value` error for a violating value.
    pub fn violation(&self, path: Option<&str>) -> RpcError {
        let mut e = RpcError::new(ErrorKind::InvalidValue);
        if let Some(tag) = &self.error_app_tag {
            e = e.with_app_tag(tag.clone());
        }
        if let Some(msg) = &self.error_message {
            e = e.with_message(msg.clone());
        }
        if let Some(p) = path {
            e = e.with_path(p);
        }
        e
    }
}

/// A compiled `pattern` restriction. YANG patterns are implicitly anchored.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub regex: Regex,
}

impl CompiledPattern {
    pub fn compile(source: &str) -> Result<Self, regex::Error> {
        let anchored = format!("^(?:{source})$");
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(&anchored)?,
        })
    }

    pub fn matches(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A named enumeration member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i32,
    /// Whether the value was written in the source or auto-assigned.
    pub explicit: bool,
}

/// A named bit member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMember {
    pub name: String,
    pub position: u32,
    pub explicit: bool,
}

/// Resolved leafref description.
#[derive(Debug, Clone)]
pub struct Leafref {
    pub path: xpath::Path,
    /// Filled by the last resolver pass.
    pub target: Option<NodeId>,
    pub require_instance: bool,
}

/// A fully resolved type description.
#[derive(Debug, Clone)]
pub struct Typedef {
    pub name: String,
    /// Named ancestor this typedef derives from, if any.
    pub parent: Option<TypedefId>,
    pub base: BaseKind,
    /// Effective range (already intersected with every ancestor).
    pub range: Option<RangeDescriptor>,
    /// Effective length restriction, same machinery over `u64` values.
    pub length: Option<RangeDescriptor>,
    /// Accumulated patterns: own plus every ancestor's, all conjunctive.
    pub patterns: Vec<CompiledPattern>,
    pub fraction_digits: Option<u8>,
    pub enums: Vec<EnumMember>,
    pub bits: Vec<BitMember>,
    pub union_members: Vec<TypedefId>,
    pub leafref: Option<Leafref>,
    pub identity_base: Option<IdentityId>,
    pub default: Option<String>,
    pub units: Option<String>,
}

impl Typedef {
    pub fn plain(name: &str, base: BaseKind) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            base,
            range: None,
            length: None,
            patterns: Vec::new(),
            fraction_digits: None,
            enums: Vec::new(),
            bits: Vec::new(),
            union_members: Vec::new(),
            leafref: None,
            identity_base: None,
            default: None,
            units: None,
        }
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumMember> {
        self.enums.iter().find(|m| m.name == name)
    }

    pub fn find_bit(&self, name: &str) -> Option<&BitMember> {
        self.bits.iter().find(|m| m.name == name)
    }
}

/// A typed leaf payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Uint(u64),
    /// Scaled integer representation: `digits / 10^fraction_digits`.
    Decimal { digits: i64, fraction_digits: u8 },
    Bool(bool),
    Text(String),
    Binary(Vec<u8>),
    Enum { name: String, value: i32 },
    Bits(Vec<BitMember>),
    Empty,
    /// Which union member accepted the value, plus the inner value.
    Union { member: usize, value: Box<ScalarValue> },
    /// Leafref values parse under the target leaf's type.
    Leafref(Box<ScalarValue>),
    InstanceId(String),
    Identity { module: String, name: String },
}

impl ScalarValue {
    /// Canonical string form, as emitted into XML.
    pub fn to_canonical(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Decimal { digits, fraction_digits } => {
                let scale = 10i64.pow(*fraction_digits as u32);
                let whole = digits / scale;
                let frac = (digits % scale).abs();
                if *fraction_digits == 0 {
                    whole.to_string()
                } else {
                    let sign = if *digits < 0 && whole == 0 { "-" } else { "" };
                    format!(
                        "{sign}{whole}.{frac:0width$}",
                        width = *fraction_digits as usize
                    )
                }
            },
            Self::Bool(v) => v.to_string(),
            Self::Text(s) => s.clone(),
            Self::Binary(b) => base64::engine::general_purpose::STANDARD.encode(b),
            Self::Enum { name, .. } => name.clone(),
            Self::Bits(bits) => {
                let names: Vec<&str> = bits.iter().map(|b| b.name.as_str()).collect();
                names.join(" ")
            },
            Self::Empty => String::new(),
            Self::Union { value, .. } => value.to_canonical(),
            Self::Leafref(v) => v.to_canonical(),
            Self::InstanceId(s) => s.clone(),
            Self::Identity { module, name } => {
                if module.is_empty() {
                    name.clone()
                } else {
                    format!("{module}:{name}")
                }
            },
        }
    }
}

fn invalid(msg: impl Into<String>) -> RpcError {
    RpcError::new(ErrorKind::InvalidValue).with_message(msg)
}

/// Parses a decimal64 literal into its scaled-integer form.
///
/// Rejects more fractional digits than the type allows (RFC 6020 §9.3).
pub fn parse_decimal64(s: &str, fraction_digits: u8) -> Result<i64, RpcError> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > fraction_digits as usize {
        return Err(invalid(format!(
            "too many fraction digits in '{s}' (max {fraction_digits})"
        )));
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid(format!("not a decimal: '{s}'")));
    }
    let negative = whole.starts_with('-');
    let whole_v: i128 = if whole.is_empty() || whole == "-" || whole == "+" {
        0
    } else {
        whole
            .parse()
            .map_err(|_| invalid(format!("not a decimal: '{s}'")))?
    };
    let mut frac_v: i128 = 0;
    for c in frac.chars() {
        let d = c
            .to_digit(10)
            .ok_or_else(|| invalid(format!("not a decimal: '{s}'")))?;
        frac_v = frac_v * 10 + d as i128;
    }
    for _ in frac.len()..fraction_digits as usize {
        frac_v *= 10;
    }
    let scale = 10i128.pow(fraction_digits as u32);
    let scaled = whole_v * scale + if negative { -frac_v } else { frac_v };
    i64::try_from(scaled).map_err(|_| invalid(format!("decimal out of range: '{s}'")))
}

impl Typedef {
    /// Validates a canonical string against this type and produces the
    /// typed payload. Leafref *instance* existence is checked separately by
    /// the transaction engine; here a leafref parses under its target type.
    pub fn parse_value(
        &self,
        ctx: &SchemaContext,
        s: &str,
    ) -> Result<ScalarValue, RpcError> {
        // Patterns are conjunctive across the ancestor chain and were
        // accumulated at finalization.
        if self.base == BaseKind::String {
            for p in &self.patterns {
                if !p.matches(s) {
                    return Err(invalid(format!(
                        "'{s}' does not match pattern '{}'",
                        p.source
                    )));
                }
            }
        }

        match self.base {
            BaseKind::Int8
            | BaseKind::Int16
            | BaseKind::Int32
            | BaseKind::Int64 => {
                let v: i64 = s
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("not an integer: '{s}'")))?;
                self.check_range(v as i128)?;
                Ok(ScalarValue::Int(v))
            },
            BaseKind::Uint8
            | BaseKind::Uint16
            | BaseKind::Uint32
            | BaseKind::Uint64 => {
                let v: u64 = s
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("not an unsigned integer: '{s}'")))?;
                self.check_range(v as i128)?;
                Ok(ScalarValue::Uint(v))
            },
            BaseKind::Decimal64 => {
                let fd = self.fraction_digits.unwrap_or(1);
                let digits = parse_decimal64(s, fd)?;
                self.check_range(digits as i128)?;
                Ok(ScalarValue::Decimal {
                    digits,
                    fraction_digits: fd,
                })
            },
            BaseKind::Bool => match s.trim() {
                "true" => Ok(ScalarValue::Bool(true)),
                "false" => Ok(ScalarValue::Bool(false)),
                other => Err(invalid(format!("not a boolean: '{other}'"))),
            },
            BaseKind::String => {
                self.check_length(s.chars().count() as i128)?;
                Ok(ScalarValue::Text(s.to_string()))
            },
            BaseKind::Binary => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(s.trim())
                    .map_err(|_| invalid(format!("not base64: '{s}'")))?;
                self.check_length(bytes.len() as i128)?;
                Ok(ScalarValue::Binary(bytes))
            },
            BaseKind::Enumeration => {
                let m = self
                    .find_enum(s.trim())
                    .ok_or_else(|| invalid(format!("unknown enum name: '{s}'")))?;
                Ok(ScalarValue::Enum {
                    name: m.name.clone(),
                    value: m.value,
                })
            },
            BaseKind::Bits => {
                let mut set = Vec::new();
                for name in s.split_whitespace() {
                    let m = self
                        .find_bit(name)
                        .ok_or_else(|| invalid(format!("unknown bit name: '{name}'")))?;
                    if set.iter().any(|b: &BitMember| b.name == m.name) {
                        return Err(invalid(format!("duplicate bit name: '{name}'")));
                    }
                    set.push(m.clone());
                }
                set.sort_by_key(|b| b.position);
                Ok(ScalarValue::Bits(set))
            },
            BaseKind::Empty => {
                if s.trim().is_empty() {
                    Ok(ScalarValue::Empty)
                } else {
                    Err(invalid("empty type accepts no value"))
                }
            },
            BaseKind::Union => {
                for (idx, member) in self.union_members.iter().enumerate() {
                    let td = ctx.typedef(*member);
                    if let Ok(v) = td.parse_value(ctx, s) {
                        return Ok(ScalarValue::Union {
                            member: idx,
                            value: Box::new(v),
                        });
                    }
                }
                Err(invalid(format!("'{s}' matches no union member type")))
            },
            BaseKind::Leafref => {
                let lref = self
                    .leafref
                    .as_ref()
                    .ok_or_else(|| invalid("leafref without a path"))?;
                match lref.target.and_then(|t| ctx.node_typedef(t)) {
                    Some(target_td) => {
                        let inner = ctx.typedef(target_td).parse_value(ctx, s)?;
                        Ok(ScalarValue::Leafref(Box::new(inner)))
                    },
                    // Target unresolved: accept structurally, instance
                    // checking happens at validate time.
                    None => Ok(ScalarValue::Leafref(Box::new(ScalarValue::Text(
                        s.to_string(),
                    )))),
                }
            },
            BaseKind::InstanceIdentifier => {
                xpath::Path::compile(s)
                    .map_err(|e| invalid(format!("bad instance-identifier: {e}")))?;
                Ok(ScalarValue::InstanceId(s.to_string()))
            },
            BaseKind::Identityref => {
                let base = self
                    .identity_base
                    .ok_or_else(|| invalid("identityref without a base"))?;
                let qn = s.trim();
                let (module, name) = match qn.split_once(':') {
                    Some((m, n)) => (m.to_string(), n.to_string()),
                    None => (String::new(), qn.to_string()),
                };
                let id = ctx
                    .find_identity(&module, &name)
                    .ok_or_else(|| invalid(format!("unknown identity: '{qn}'")))?;
                if !ctx.identity_derived_from(id, base) {
                    return Err(invalid(format!(
                        "identity '{qn}' is not derived from the required base"
                    )));
                }
                Ok(ScalarValue::Identity { module, name })
            },
        }
    }

    fn check_range(&self, v: i128) -> Result<(), RpcError> {
        match &self.range {
            Some(r) if !r.accepts(v) => Err(r.violation(None)),
            _ => Ok(()),
        }
    }

    fn check_length(&self, v: i128) -> Result<(), RpcError> {
        match &self.length {
            Some(r) if !r.accepts(v) => Err(r.violation(None)),
            _ => Ok(()),
        }
    }
}
