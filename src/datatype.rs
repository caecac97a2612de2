// used to hand out borrowed, NUL-terminated names across the C interface
use std::ffi::{CStr, CString};
// used to print out readable forms of a value
use std::fmt;
// record references never own the record they point at
use std::sync::{Arc, Weak};

use crate::construct::Record;
use crate::error::{Result, TableGenError};

// ------------- Kinds -------------
/// The closed set of value kinds. The discriminant order is part of the C interface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecTyKind {
    Bit,
    Bits,
    Code,
    Int,
    String,
    List,
    Dag,
    Record,
    Invalid,
}

impl fmt::Display for RecTyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RecTyKind::Bit => "bit",
            RecTyKind::Bits => "bits",
            RecTyKind::Code => "code",
            RecTyKind::Int => "int",
            RecTyKind::String => "string",
            RecTyKind::List => "list",
            RecTyKind::Dag => "dag",
            RecTyKind::Record => "record",
            RecTyKind::Invalid => "invalid",
        };
        write!(f, "{}", name)
    }
}

// ------------- Types -------------
/// A declared field type, including the parameters the kind alone does not carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecTy {
    Bit,
    Bits(usize),
    Int,
    String,
    Code,
    List(Box<RecTy>),
    Dag,
    /// A record of the named class (or of a class deriving from it).
    Record(String),
    /// A record of no particular class, such as a def without superclasses.
    AnyRecord,
}

impl RecTy {
    pub fn kind(&self) -> RecTyKind {
        match self {
            RecTy::Bit => RecTyKind::Bit,
            RecTy::Bits(_) => RecTyKind::Bits,
            RecTy::Int => RecTyKind::Int,
            RecTy::String => RecTyKind::String,
            RecTy::Code => RecTyKind::Code,
            RecTy::List(_) => RecTyKind::List,
            RecTy::Dag => RecTyKind::Dag,
            RecTy::Record(_) | RecTy::AnyRecord => RecTyKind::Record,
        }
    }
    pub fn element(&self) -> Option<&RecTy> {
        match self {
            RecTy::List(element) => Some(element),
            _ => None,
        }
    }
}

impl fmt::Display for RecTy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecTy::Bit => write!(f, "bit"),
            RecTy::Bits(width) => write!(f, "bits<{}>", width),
            RecTy::Int => write!(f, "int"),
            RecTy::String => write!(f, "string"),
            RecTy::Code => write!(f, "code"),
            RecTy::List(element) => write!(f, "list<{}>", element),
            RecTy::Dag => write!(f, "dag"),
            RecTy::Record(class) => write!(f, "{}", class),
            RecTy::AnyRecord => write!(f, "{{}}"),
        }
    }
}

// ------------- Symbol -------------
/// An immutable name kept both as Rust text and as a C string, so that
/// borrowed names can cross the C interface without allocating.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    text: String,
    c_text: CString,
}

impl Symbol {
    /// Returns `None` when the name contains an interior NUL byte.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let c_text = CString::new(text.as_bytes()).ok()?;
        Some(Self { text, c_text })
    }
    pub fn as_str(&self) -> &str {
        &self.text
    }
    pub fn as_c_str(&self) -> &CStr {
        &self.c_text
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.text)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

// ------------- RecordRef -------------
/// A non-owning reference to a def. The keeper stays the only owner of the
/// record; the reference can be followed directly or resolved by name.
#[derive(Clone)]
pub struct RecordRef {
    name: Symbol,
    target: Weak<Record>,
}

impl RecordRef {
    pub fn new(record: &Arc<Record>) -> Self {
        Self {
            name: record.symbol().clone(),
            target: Arc::downgrade(record),
        }
    }
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
    pub fn symbol(&self) -> &Symbol {
        &self.name
    }
    pub fn get(&self) -> Option<Arc<Record>> {
        self.target.upgrade()
    }
    // valid for as long as the owning keeper is alive
    pub(crate) fn as_ptr(&self) -> *const Record {
        self.target.as_ptr()
    }
}

impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Weak::ptr_eq(&self.target, &other.target)
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RecordRef({})", self.name)
    }
}

// ------------- List -------------
#[derive(Debug, Clone, PartialEq)]
pub struct ListValue {
    element: RecTy,
    items: Vec<TypedValue>,
}

impl ListValue {
    pub fn new(element: RecTy, items: Vec<TypedValue>) -> Self {
        Self { element, items }
    }
    pub fn element(&self) -> &RecTy {
        &self.element
    }
    pub fn items(&self) -> &[TypedValue] {
        &self.items
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&TypedValue> {
        self.items.get(index)
    }
}

// ------------- Dag -------------
#[derive(Debug, Clone, PartialEq)]
pub enum DagOperator {
    Def(RecordRef),
    Name(Symbol),
}

impl DagOperator {
    pub fn name(&self) -> &str {
        match self {
            DagOperator::Def(record) => record.name(),
            DagOperator::Name(name) => name.as_str(),
        }
    }
    pub(crate) fn c_name(&self) -> &CStr {
        match self {
            DagOperator::Def(record) => record.symbol().as_c_str(),
            DagOperator::Name(name) => name.as_c_str(),
        }
    }
}

/// One argument of a dag. Both the name and the value may be absent.
#[derive(Debug, Clone, PartialEq)]
pub struct DagArg {
    pub name: Option<Symbol>,
    pub value: Option<TypedValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DagValue {
    operator: DagOperator,
    args: Vec<DagArg>,
}

impl DagValue {
    pub fn new(operator: DagOperator, args: Vec<DagArg>) -> Self {
        Self { operator, args }
    }
    pub fn operator(&self) -> &DagOperator {
        &self.operator
    }
    pub fn args(&self) -> &[DagArg] {
        &self.args
    }
    pub fn len(&self) -> usize {
        self.args.len()
    }
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

// ------------- TypedValue -------------
/// A resolved value. Unset values are never represented here: a field or dag
/// argument without a value holds `None`, and an unset bit inside a bit-vector
/// is a `None` element. Bit-vectors are stored least significant bit first.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bit(bool),
    Bits(Vec<Option<bool>>),
    Int(i64),
    String(String),
    Code(String),
    List(ListValue),
    Dag(DagValue),
    Def(RecordRef),
}

impl TypedValue {
    pub fn kind(&self) -> RecTyKind {
        match self {
            TypedValue::Bit(_) => RecTyKind::Bit,
            TypedValue::Bits(_) => RecTyKind::Bits,
            TypedValue::Int(_) => RecTyKind::Int,
            TypedValue::String(_) => RecTyKind::String,
            TypedValue::Code(_) => RecTyKind::Code,
            TypedValue::List(_) => RecTyKind::List,
            TypedValue::Dag(_) => RecTyKind::Dag,
            TypedValue::Def(_) => RecTyKind::Record,
        }
    }
    /// The most specific type this value has on its own.
    pub fn ty(&self) -> RecTy {
        match self {
            TypedValue::Bit(_) => RecTy::Bit,
            TypedValue::Bits(bits) => RecTy::Bits(bits.len()),
            TypedValue::Int(_) => RecTy::Int,
            TypedValue::String(_) => RecTy::String,
            TypedValue::Code(_) => RecTy::Code,
            TypedValue::List(list) => RecTy::List(Box::new(list.element.clone())),
            TypedValue::Dag(_) => RecTy::Dag,
            TypedValue::Def(record) => record
                .get()
                .and_then(|r| r.direct_superclasses().first().cloned())
                .map_or(RecTy::AnyRecord, RecTy::Record),
        }
    }

    fn mismatch(&self, expected: RecTyKind) -> TableGenError {
        TableGenError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }
    pub fn as_bit(&self) -> Result<bool> {
        match self {
            TypedValue::Bit(bit) => Ok(*bit),
            _ => Err(self.mismatch(RecTyKind::Bit)),
        }
    }
    pub fn as_bits(&self) -> Result<&[Option<bool>]> {
        match self {
            TypedValue::Bits(bits) => Ok(bits),
            _ => Err(self.mismatch(RecTyKind::Bits)),
        }
    }
    pub fn as_int(&self) -> Result<i64> {
        match self {
            TypedValue::Int(int) => Ok(*int),
            _ => Err(self.mismatch(RecTyKind::Int)),
        }
    }
    /// Succeeds for both `string` and `code` values; they share one representation.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            TypedValue::String(text) | TypedValue::Code(text) => Ok(text),
            _ => Err(self.mismatch(RecTyKind::String)),
        }
    }
    pub fn as_list(&self) -> Result<&ListValue> {
        match self {
            TypedValue::List(list) => Ok(list),
            _ => Err(self.mismatch(RecTyKind::List)),
        }
    }
    pub fn list_len(&self) -> Result<usize> {
        Ok(self.as_list()?.len())
    }
    pub fn list_element(&self, index: usize) -> Result<&TypedValue> {
        let list = self.as_list()?;
        list.get(index).ok_or(TableGenError::IndexOutOfRange {
            index,
            len: list.len(),
        })
    }
    pub fn as_dag(&self) -> Result<&DagValue> {
        match self {
            TypedValue::Dag(dag) => Ok(dag),
            _ => Err(self.mismatch(RecTyKind::Dag)),
        }
    }
    pub fn dag_operator(&self) -> Result<&DagOperator> {
        Ok(self.as_dag()?.operator())
    }
    pub fn dag_num_args(&self) -> Result<usize> {
        Ok(self.as_dag()?.len())
    }
    fn dag_arg_at(&self, index: usize) -> Result<&DagArg> {
        let dag = self.as_dag()?;
        dag.args.get(index).ok_or(TableGenError::IndexOutOfRange {
            index,
            len: dag.len(),
        })
    }
    /// `Ok(None)` means the argument exists but is unset.
    pub fn dag_arg(&self, index: usize) -> Result<Option<&TypedValue>> {
        Ok(self.dag_arg_at(index)?.value.as_ref())
    }
    pub fn dag_arg_name(&self, index: usize) -> Result<Option<&str>> {
        Ok(self.dag_arg_at(index)?.name.as_ref().map(Symbol::as_str))
    }
    pub fn as_record_ref(&self) -> Result<&RecordRef> {
        match self {
            TypedValue::Def(record) => Ok(record),
            _ => Err(self.mismatch(RecTyKind::Record)),
        }
    }

    /// Converts the value to the declared type `ty`, the way an assignment does.
    /// Returns `None` when no conversion exists.
    pub fn convert_to(self, ty: &RecTy) -> Option<TypedValue> {
        match (self, ty) {
            (value @ TypedValue::Bit(_), RecTy::Bit) => Some(value),
            (TypedValue::Int(int), RecTy::Bit) => match int {
                0 => Some(TypedValue::Bit(false)),
                1 => Some(TypedValue::Bit(true)),
                _ => None,
            },
            (TypedValue::Bits(bits), RecTy::Bit) if bits.len() == 1 => {
                bits[0].map(TypedValue::Bit)
            }
            (TypedValue::Bits(bits), RecTy::Bits(width)) if bits.len() == *width => {
                Some(TypedValue::Bits(bits))
            }
            (TypedValue::Bit(bit), RecTy::Bits(1)) => Some(TypedValue::Bits(vec![Some(bit)])),
            (TypedValue::Int(int), RecTy::Bits(width)) => {
                int_to_bits(int, *width).map(TypedValue::Bits)
            }
            (value @ TypedValue::Int(_), RecTy::Int) => Some(value),
            (TypedValue::Bit(bit), RecTy::Int) => Some(TypedValue::Int(bit as i64)),
            (TypedValue::Bits(bits), RecTy::Int) => bits_to_int(&bits).map(TypedValue::Int),
            (TypedValue::String(text) | TypedValue::Code(text), RecTy::String) => {
                Some(TypedValue::String(text))
            }
            (TypedValue::String(text) | TypedValue::Code(text), RecTy::Code) => {
                Some(TypedValue::Code(text))
            }
            (TypedValue::List(list), RecTy::List(element)) => {
                let items = list
                    .items
                    .into_iter()
                    .map(|item| item.convert_to(element))
                    .collect::<Option<Vec<_>>>()?;
                Some(TypedValue::List(ListValue::new((**element).clone(), items)))
            }
            (value @ TypedValue::Dag(_), RecTy::Dag) => Some(value),
            (value @ TypedValue::Def(_), RecTy::AnyRecord) => Some(value),
            (TypedValue::Def(record), RecTy::Record(class)) => {
                let target = record.get()?;
                if target.name() == class || target.is_subclass_of(class) {
                    Some(TypedValue::Def(record))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

// An integer fits a bit-vector when it is representable either signed or unsigned.
fn int_to_bits(value: i64, width: usize) -> Option<Vec<Option<bool>>> {
    if width < 64 {
        let unsigned_fits = value >= 0 && (value as u64) < (1u64 << width);
        let signed_fits = width > 0
            && value >= -(1i64 << (width - 1))
            && value < (1i64 << (width - 1));
        if !unsigned_fits && !signed_fits {
            return None;
        }
    }
    Some(
        (0..width)
            .map(|i| Some(if i < 64 { (value >> i) & 1 == 1 } else { value < 0 }))
            .collect(),
    )
}

fn bits_to_int(bits: &[Option<bool>]) -> Option<i64> {
    if bits.len() > 64 {
        return None;
    }
    bits.iter()
        .enumerate()
        .try_fold(0i64, |acc, (i, bit)| {
            bit.map(|set| if set { acc | (1i64 << i) } else { acc })
        })
}

pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders an optional value, printing `?` for an unset one.
pub struct MaybeUnset<'a>(pub Option<&'a TypedValue>);

impl fmt::Display for MaybeUnset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "?"),
        }
    }
}

impl fmt::Display for DagArg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", MaybeUnset(self.value.as_ref()))?;
        if let Some(name) = &self.name {
            write!(f, ":${}", name)?;
        }
        Ok(())
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypedValue::Bit(bit) => write!(f, "{}", *bit as u8),
            TypedValue::Bits(bits) => {
                let shown: Vec<String> = bits
                    .iter()
                    .rev()
                    .map(|bit| match bit {
                        Some(true) => "1".to_string(),
                        Some(false) => "0".to_string(),
                        None => "?".to_string(),
                    })
                    .collect();
                write!(f, "{{ {} }}", shown.join(", "))
            }
            TypedValue::Int(int) => write!(f, "{}", int),
            TypedValue::String(text) => write!(f, "\"{}\"", escape(text)),
            TypedValue::Code(text) => write!(f, "[{{{}}}]", text),
            TypedValue::List(list) => {
                let shown: Vec<String> = list.items.iter().map(|item| item.to_string()).collect();
                write!(f, "[{}]", shown.join(", "))
            }
            TypedValue::Dag(dag) => {
                write!(f, "({}", dag.operator.name())?;
                let shown: Vec<String> = dag.args.iter().map(|arg| arg.to_string()).collect();
                if !shown.is_empty() {
                    write!(f, " {}", shown.join(", "))?;
                }
                write!(f, ")")
            }
            TypedValue::Def(record) => write!(f, "{}", record.name()),
        }
    }
}
