//! Records and the keeper that owns them.
//!
//! Both abstract classes and concrete defs share one shape, the [`Record`]:
//! an ordered list of named, typed field slots ([`RecordValue`]) together
//! with the precomputed, transitive set of classes the record derives from.
//!
//! The "keeper" pattern is used to own records and guarantee name uniqueness.
//! A [`RecordKeeper`] holds two keepers of its own, one for classes and one for
//! defs, each a [`RecordMap`] that preserves insertion order and indexes names.
//!
//! Everything in here is built once by the parser and never mutated afterwards,
//! so shared references can be handed out freely and read from any thread.

// other keepers use HashSet or HashMap
use core::hash::BuildHasherDefault;
use std::collections::{HashMap, HashSet};
use seahash::SeaHasher;

// used to keep records shareable with non-owning references to them
use std::sync::{Arc, OnceLock, Weak};

// used to print out readable forms of a construct
use std::fmt;
use std::ffi::CStr;

// our own stuff that we need
use crate::datatype::{
    DagValue, ListValue, MaybeUnset, RecTy, RecTyKind, RecordRef, Symbol, TypedValue,
};
use crate::error::{Result, TableGenError};

pub type NameHasher = BuildHasherDefault<SeaHasher>;

// ------------- RecordValue -------------
/// A field slot: a name, its declared type and its resolved value.
#[derive(Debug)]
pub struct RecordValue {
    name: Symbol,
    ty: RecTy,
    value: Option<TypedValue>,
}

impl RecordValue {
    pub fn new(name: Symbol, ty: RecTy, value: Option<TypedValue>) -> Self {
        Self { name, ty, value }
    }
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
    pub fn c_name(&self) -> &CStr {
        self.name.as_c_str()
    }
    pub fn ty(&self) -> &RecTy {
        &self.ty
    }
    pub fn kind(&self) -> RecTyKind {
        self.ty.kind()
    }
    /// `None` when the field is unset.
    pub fn value(&self) -> Option<&TypedValue> {
        self.value.as_ref()
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} = {}", self.ty, self.name, MaybeUnset(self.value.as_ref()))
    }
}

// ------------- Record -------------
#[derive(Debug)]
pub struct Record {
    name: Symbol,
    anonymous: bool,
    class: bool,
    fields: Vec<RecordValue>,
    field_lookup: HashMap<String, usize, NameHasher>,
    // most-base first, no duplicates
    superclasses: Vec<String>,
    direct_superclasses: Vec<String>,
    superclass_lookup: HashSet<String, NameHasher>,
    // set once the keeper holding this record is shared
    keeper: OnceLock<Weak<RecordKeeper>>,
}

impl Record {
    pub fn new(
        name: Symbol,
        anonymous: bool,
        class: bool,
        fields: Vec<RecordValue>,
        superclasses: Vec<String>,
        direct_superclasses: Vec<String>,
    ) -> Self {
        let field_lookup = fields
            .iter()
            .enumerate()
            .map(|(i, field)| (field.name().to_string(), i))
            .collect();
        let superclass_lookup = superclasses.iter().cloned().collect();
        Self {
            name,
            anonymous,
            class,
            fields,
            field_lookup,
            superclasses,
            direct_superclasses,
            superclass_lookup,
            keeper: OnceLock::new(),
        }
    }
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
    pub fn c_name(&self) -> &CStr {
        self.name.as_c_str()
    }
    pub fn symbol(&self) -> &Symbol {
        &self.name
    }
    /// True when the name was synthesized rather than written in the source.
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
    pub fn is_class(&self) -> bool {
        self.class
    }
    pub fn fields(&self) -> &[RecordValue] {
        &self.fields
    }
    pub fn get_field(&self, name: &str) -> Option<&RecordValue> {
        self.field_lookup.get(name).map(|&i| &self.fields[i])
    }
    pub fn field_type(&self, name: &str) -> Option<RecTyKind> {
        self.get_field(name).map(RecordValue::kind)
    }
    pub fn is_subclass_of(&self, class_name: &str) -> bool {
        self.superclass_lookup.contains(class_name)
    }
    pub fn superclasses(&self) -> &[String] {
        &self.superclasses
    }
    /// The keeper holding this record, once that keeper has been shared.
    pub fn keeper(&self) -> Option<Arc<RecordKeeper>> {
        self.keeper.get().and_then(Weak::upgrade)
    }
    pub(crate) fn keeper_ptr(&self) -> *const RecordKeeper {
        self.keeper.get().map_or(std::ptr::null(), Weak::as_ptr)
    }
    pub fn direct_superclasses(&self) -> &[String] {
        &self.direct_superclasses
    }
    pub fn first_field(&self) -> Option<&RecordValue> {
        self.fields.first()
    }
    /// The field declared after `current`, or `None` at the end (or when
    /// `current` does not belong to this record).
    pub fn next_field(&self, current: &RecordValue) -> Option<&RecordValue> {
        let &i = self.field_lookup.get(current.name())?;
        if !std::ptr::eq(&self.fields[i], current) {
            return None;
        }
        self.fields.get(i + 1)
    }

    fn field_value(&self, name: &str) -> Result<&TypedValue> {
        let field = self.get_field(name).ok_or_else(|| TableGenError::NotFound {
            kind: "field",
            name: name.to_string(),
        })?;
        field.value().ok_or_else(|| TableGenError::Unset {
            field: name.to_string(),
        })
    }
    pub fn value_as_bit(&self, name: &str) -> Result<bool> {
        self.field_value(name)?.as_bit()
    }
    pub fn value_as_bits(&self, name: &str) -> Result<&[Option<bool>]> {
        self.field_value(name)?.as_bits()
    }
    pub fn value_as_int(&self, name: &str) -> Result<i64> {
        self.field_value(name)?.as_int()
    }
    pub fn value_as_string(&self, name: &str) -> Result<&str> {
        self.field_value(name)?.as_str()
    }
    pub fn value_as_list(&self, name: &str) -> Result<&ListValue> {
        self.field_value(name)?.as_list()
    }
    pub fn value_as_dag(&self, name: &str) -> Result<&DagValue> {
        self.field_value(name)?.as_dag()
    }
    pub fn value_as_def(&self, name: &str) -> Result<&RecordRef> {
        self.field_value(name)?.as_record_ref()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let keyword = if self.class { "class" } else { "def" };
        write!(f, "{} {} {{", keyword, self.name)?;
        if !self.superclasses.is_empty() {
            write!(f, "\t//")?;
            for superclass in &self.superclasses {
                write!(f, " {}", superclass)?;
            }
        }
        writeln!(f)?;
        for field in &self.fields {
            writeln!(f, "  {};", field)?;
        }
        writeln!(f, "}}")
    }
}

// ------------- RecordMap -------------
/// One entry of a [`RecordMap`]. Entries are stored contiguously and know
/// whether they are the final one, which is all a forward cursor needs.
#[derive(Debug)]
pub struct RecordMapItem {
    record: Arc<Record>,
    last: bool,
}

impl RecordMapItem {
    pub fn name(&self) -> &str {
        self.record.name()
    }
    pub fn record(&self) -> &Record {
        &self.record
    }
    pub fn is_last(&self) -> bool {
        self.last
    }
}

#[derive(Debug, Default)]
pub struct RecordMap {
    kept: Vec<RecordMapItem>,
    lookup: HashMap<String, usize, NameHasher>,
}

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }
    /// Keeps the record unless one with the same name is already kept, in
    /// which case the previously kept record is returned and flagged.
    pub(crate) fn keep(&mut self, record: Record) -> (Arc<Record>, bool) {
        if let Some(&i) = self.lookup.get(record.name()) {
            return (Arc::clone(&self.kept[i].record), true);
        }
        if let Some(previous) = self.kept.last_mut() {
            previous.last = false;
        }
        let keepsake = Arc::new(record);
        self.lookup
            .insert(keepsake.name().to_string(), self.kept.len());
        self.kept.push(RecordMapItem {
            record: Arc::clone(&keepsake),
            last: true,
        });
        (keepsake, false)
    }
    pub fn get(&self, name: &str) -> Option<&Record> {
        self.get_shared(name).map(|record| &**record)
    }
    pub(crate) fn get_shared(&self, name: &str) -> Option<&Arc<Record>> {
        self.lookup.get(name).map(|&i| &self.kept[i].record)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn first(&self) -> Option<&Record> {
        self.kept.first().map(RecordMapItem::record)
    }
    pub fn item(&self, index: usize) -> Option<&RecordMapItem> {
        self.kept.get(index)
    }
    pub fn items(&self) -> &[RecordMapItem] {
        &self.kept
    }
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.kept.iter().map(RecordMapItem::record)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.kept.iter().map(|item| (item.name(), item.record()))
    }
    /// Names in insertion order; the strings stay owned by the records.
    pub fn keys(&self) -> Vec<&str> {
        self.kept.iter().map(RecordMapItem::name).collect()
    }
}

// ------------- RecordKeeper -------------
#[derive(Debug, Default)]
pub struct RecordKeeper {
    classes: RecordMap,
    defs: RecordMap,
}

impl RecordKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    /// Moves the keeper behind an `Arc` and links every record back to it.
    pub fn into_shared(self) -> Arc<RecordKeeper> {
        Arc::new_cyclic(|keeper| {
            for record in self.classes.records().chain(self.defs.records()) {
                let _ = record.keeper.set(Weak::clone(keeper));
            }
            self
        })
    }
    pub fn classes(&self) -> &RecordMap {
        &self.classes
    }
    pub fn defs(&self) -> &RecordMap {
        &self.defs
    }
    pub fn get_class(&self, name: &str) -> Option<&Record> {
        self.classes.get(name)
    }
    pub fn get_def(&self, name: &str) -> Option<&Record> {
        self.defs.get(name)
    }
    /// Every def deriving from `class_name`, in definition order. Unknown
    /// classes simply yield nothing.
    pub fn all_derived_definitions(&self, class_name: &str) -> Vec<&Record> {
        self.defs
            .records()
            .filter(|record| record.is_subclass_of(class_name))
            .collect()
    }
    /// Follows a record reference by name through the defs.
    pub fn resolve(&self, reference: &RecordRef) -> Option<&Record> {
        self.defs.get(reference.name())
    }
    pub(crate) fn keep_class(&mut self, record: Record) -> (Arc<Record>, bool) {
        self.classes.keep(record)
    }
    pub(crate) fn keep_def(&mut self, record: Record) -> (Arc<Record>, bool) {
        self.defs.keep(record)
    }
    pub(crate) fn shared_def(&self, name: &str) -> Option<&Arc<Record>> {
        self.defs.get_shared(name)
    }
}

impl fmt::Display for RecordKeeper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "------------- Classes -----------------")?;
        for class in self.classes.records() {
            write!(f, "{}", class)?;
        }
        writeln!(f, "------------- Defs -----------------")?;
        for def in self.defs.records() {
            write!(f, "{}", def)?;
        }
        Ok(())
    }
}
