//! C interface for querying a record keeper.
//!
//! Every value crossing the boundary is either
//! * a borrowed, non-owning handle into the keeper (records, field slots,
//!   values, map items and names), valid until `tableGenFree`, never released
//!   individually; or
//! * an owned result (duplicated strings, key arrays, bit arrays, record vectors
//!   and dag pairs) that must be handed back exactly once to its release function.
//!
//! Owned arrays carry their allocation size in a hidden prefix so that they can
//! be released from the pointer alone. Every owned allocation and release is
//! counted, see [`owned_allocations`].
//!
//! Null handles and unknown names are answered with a sentinel (null, false,
//! zero or `TableGenInvalidRecTyKind`); nothing panics across the boundary.
//!
//! # Safety
//! Handles passed in must be null or have been obtained from this interface
//! for a `TableGen` that has not been freed. String arguments must be null or
//! NUL-terminated.

#![allow(unsafe_op_in_unsafe_fn, clippy::missing_safety_doc)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug_span, warn};

use crate::construct::{Record, RecordKeeper, RecordMap, RecordMapItem, RecordValue};
use crate::datatype::{RecTyKind, TypedValue};
use crate::session::Session;

pub type TableGenBool = c_int;
pub const TABLEGEN_TRUE: TableGenBool = 1;
pub const TABLEGEN_FALSE: TableGenBool = 0;
/// How an unset bit is reported inside a bit array.
pub const TABLEGEN_UNSET_BIT: i8 = -1;

pub type TableGenRef = *mut TableGen;
pub type TableGenRecordKeeperRef = *const RecordKeeper;
pub type TableGenRecordMapRef = *const RecordMap;
pub type TableGenRecordKeeperItemRef = *const RecordMapItem;
pub type TableGenRecordRef = *const Record;
pub type TableGenRecordValRef = *const RecordValue;
pub type TableGenTypedInitRef = *const TypedValue;
pub type TableGenRecordVectorRef = *mut RecordVector;
pub type TableGenDagPairRef = *mut DagPair;

// ------------- Allocation ledger -------------
static OWNED_STRINGS: AtomicI64 = AtomicI64::new(0);
static OWNED_STRING_ARRAYS: AtomicI64 = AtomicI64::new(0);
static OWNED_BIT_ARRAYS: AtomicI64 = AtomicI64::new(0);
static OWNED_RECORD_VECTORS: AtomicI64 = AtomicI64::new(0);
static OWNED_DAG_PAIRS: AtomicI64 = AtomicI64::new(0);

/// Owned results currently outstanding, per shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnedAllocations {
    pub strings: i64,
    pub string_arrays: i64,
    pub bit_arrays: i64,
    pub record_vectors: i64,
    pub dag_pairs: i64,
}

impl OwnedAllocations {
    pub fn total(&self) -> i64 {
        self.strings + self.string_arrays + self.bit_arrays + self.record_vectors + self.dag_pairs
    }
}

pub fn owned_allocations() -> OwnedAllocations {
    OwnedAllocations {
        strings: OWNED_STRINGS.load(Ordering::Relaxed),
        string_arrays: OWNED_STRING_ARRAYS.load(Ordering::Relaxed),
        bit_arrays: OWNED_BIT_ARRAYS.load(Ordering::Relaxed),
        record_vectors: OWNED_RECORD_VECTORS.load(Ordering::Relaxed),
        dag_pairs: OWNED_DAG_PAIRS.load(Ordering::Relaxed),
    }
}

// The allocation size is stored in front of the returned pointer.
const PREFIX: usize = 8;

unsafe fn alloc_array<T: Copy>(items: &[T]) -> *mut T {
    let size = std::mem::size_of_val(items);
    let layout = match std::alloc::Layout::from_size_align(size + PREFIX, PREFIX) {
        Ok(layout) => layout,
        Err(_) => return ptr::null_mut(),
    };
    let base = std::alloc::alloc(layout);
    if base.is_null() {
        return ptr::null_mut();
    }
    base.cast::<usize>().write(size);
    let data = base.add(PREFIX).cast::<T>();
    ptr::copy_nonoverlapping(items.as_ptr(), data, items.len());
    data
}

unsafe fn free_array<T>(data: *mut T) {
    if data.is_null() {
        return;
    }
    let base = data.cast::<u8>().sub(PREFIX);
    let size = base.cast::<usize>().read();
    if let Ok(layout) = std::alloc::Layout::from_size_align(size + PREFIX, PREFIX) {
        std::alloc::dealloc(base, layout);
    }
}

unsafe fn new_string(text: &str) -> *mut c_char {
    let mut bytes: Vec<u8> = text.bytes().filter(|&b| b != 0).collect();
    bytes.push(0);
    let string = alloc_array(&bytes).cast::<c_char>();
    if !string.is_null() {
        OWNED_STRINGS.fetch_add(1, Ordering::Relaxed);
    }
    string
}

unsafe fn new_bit_array(bits: &[Option<bool>], len: *mut usize) -> *mut i8 {
    let encoded: Vec<i8> = bits
        .iter()
        .map(|bit| match bit {
            Some(true) => 1,
            Some(false) => 0,
            None => TABLEGEN_UNSET_BIT,
        })
        .collect();
    let array = alloc_array(&encoded);
    if !array.is_null() {
        OWNED_BIT_ARRAYS.fetch_add(1, Ordering::Relaxed);
        if !len.is_null() {
            *len = encoded.len();
        }
    }
    array
}

// ------------- Helpers -------------
unsafe fn name_arg<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

fn raw<T>(value: Option<&T>) -> *const T {
    value.map_or(ptr::null(), |value| value as *const T)
}

fn boolean(value: bool) -> TableGenBool {
    if value { TABLEGEN_TRUE } else { TABLEGEN_FALSE }
}

unsafe fn slot_value<'a>(rv_ref: TableGenRecordValRef) -> Option<&'a TypedValue> {
    rv_ref.as_ref()?.value()
}

// ------------- Session -------------
/// Opaque session handle: the source and include paths to parse, and once
/// parsed, the session owning the keeper.
pub struct TableGen {
    source: String,
    includes: Vec<PathBuf>,
    session: Option<Session>,
    last_error: Option<CString>,
    attempted: bool,
}

impl TableGen {
    fn fail(&mut self, message: String) {
        warn!(%message, "parse failed");
        self.last_error = Some(CString::new(message.replace('\0', " ")).unwrap_or_default());
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenInitialize(
    source: *const c_char,
    includes_sz: usize,
    includes: *const *const c_char,
) -> TableGenRef {
    let _span = debug_span!("tablegen_api", api_func = "initialize").entered();
    let Some(source) = name_arg(source) else {
        return ptr::null_mut();
    };
    let mut paths = Vec::with_capacity(includes_sz);
    if !includes.is_null() {
        for i in 0..includes_sz {
            match name_arg(*includes.add(i)) {
                Some(path) => paths.push(PathBuf::from(path)),
                None => return ptr::null_mut(),
            }
        }
    }
    Box::into_raw(Box::new(TableGen {
        source: source.to_string(),
        includes: paths,
        session: None,
        last_error: None,
        attempted: false,
    }))
}

/// Parses the source given at initialization. Only the first call can succeed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenParse(tg_ref: TableGenRef) -> TableGenBool {
    let _span = debug_span!("tablegen_api", api_func = "parse").entered();
    let Some(tg) = tg_ref.as_mut() else {
        return TABLEGEN_FALSE;
    };
    if tg.attempted {
        tg.fail("Source has already been parsed".to_string());
        return TABLEGEN_FALSE;
    }
    tg.attempted = true;
    match Session::open(&tg.source, tg.includes.iter().cloned()) {
        Ok(session) => {
            tg.session = Some(session);
            tg.last_error = None;
            TABLEGEN_TRUE
        }
        Err(e) => {
            tg.fail(e.to_string());
            TABLEGEN_FALSE
        }
    }
}

/// The message of the last failed parse, borrowed from the handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenGetLastError(tg_ref: TableGenRef) -> *const c_char {
    match tg_ref.as_ref().and_then(|tg| tg.last_error.as_ref()) {
        Some(message) => message.as_ptr(),
        None => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenGetRecordKeeper(tg_ref: TableGenRef) -> TableGenRecordKeeperRef {
    let session = tg_ref.as_ref().and_then(|tg| tg.session.as_ref());
    raw(session.map(Session::record_keeper))
}

/// Releases the handle and, with it, every record reachable from it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenFree(tg_ref: TableGenRef) {
    let _span = debug_span!("tablegen_api", api_func = "free").entered();
    if !tg_ref.is_null() {
        drop(Box::from_raw(tg_ref));
    }
}

// ------------- RecordKeeper -------------
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetClasses(
    rk_ref: TableGenRecordKeeperRef,
) -> TableGenRecordMapRef {
    raw(rk_ref.as_ref().map(RecordKeeper::classes))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetDefs(
    rk_ref: TableGenRecordKeeperRef,
) -> TableGenRecordMapRef {
    raw(rk_ref.as_ref().map(RecordKeeper::defs))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetClass(
    rk_ref: TableGenRecordKeeperRef,
    name: *const c_char,
) -> TableGenRecordRef {
    match (rk_ref.as_ref(), name_arg(name)) {
        (Some(keeper), Some(name)) => raw(keeper.get_class(name)),
        _ => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetDef(
    rk_ref: TableGenRecordKeeperRef,
    name: *const c_char,
) -> TableGenRecordRef {
    match (rk_ref.as_ref(), name_arg(name)) {
        (Some(keeper), Some(name)) => raw(keeper.get_def(name)),
        _ => ptr::null(),
    }
}

/// Owned vector of the defs deriving from a class; release with
/// `tableGenRecordVectorFree`.
pub struct RecordVector {
    records: Vec<*const Record>,
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetAllDerivedDefinitions(
    rk_ref: TableGenRecordKeeperRef,
    class_name: *const c_char,
) -> TableGenRecordVectorRef {
    let (Some(keeper), Some(class_name)) = (rk_ref.as_ref(), name_arg(class_name)) else {
        return ptr::null_mut();
    };
    let records = keeper
        .all_derived_definitions(class_name)
        .into_iter()
        .map(|record| record as *const Record)
        .collect();
    OWNED_RECORD_VECTORS.fetch_add(1, Ordering::Relaxed);
    Box::into_raw(Box::new(RecordVector { records }))
}

/// Null past the end of the vector.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordVectorGet(
    vec_ref: TableGenRecordVectorRef,
    index: usize,
) -> TableGenRecordRef {
    vec_ref
        .as_ref()
        .and_then(|vector| vector.records.get(index).copied())
        .unwrap_or(ptr::null())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordVectorFree(vec_ref: TableGenRecordVectorRef) {
    if !vec_ref.is_null() {
        OWNED_RECORD_VECTORS.fetch_sub(1, Ordering::Relaxed);
        drop(Box::from_raw(vec_ref));
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetFirstClass(
    rk_ref: TableGenRecordKeeperRef,
) -> TableGenRecordKeeperItemRef {
    raw(rk_ref.as_ref().and_then(|keeper| keeper.classes().items().first()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetFirstDef(
    rk_ref: TableGenRecordKeeperRef,
) -> TableGenRecordKeeperItemRef {
    raw(rk_ref.as_ref().and_then(|keeper| keeper.defs().items().first()))
}

// items of a map are stored contiguously, so the next one directly follows
unsafe fn next_item(item: TableGenRecordKeeperItemRef) -> TableGenRecordKeeperItemRef {
    match item.as_ref() {
        Some(current) if !current.is_last() => item.add(1),
        _ => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetNextClass(
    item: TableGenRecordKeeperItemRef,
) -> TableGenRecordKeeperItemRef {
    next_item(item)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperGetNextDef(
    item: TableGenRecordKeeperItemRef,
) -> TableGenRecordKeeperItemRef {
    next_item(item)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperItemGetName(
    item: TableGenRecordKeeperItemRef,
) -> *const c_char {
    item.as_ref()
        .map_or(ptr::null(), |item| item.record().c_name().as_ptr())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordKeeperItemGetRecord(
    item: TableGenRecordKeeperItemRef,
) -> TableGenRecordRef {
    raw(item.as_ref().map(RecordMapItem::record))
}

// ------------- RecordMap -------------
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordMapGetFirst(rm_ref: TableGenRecordMapRef) -> TableGenRecordRef {
    raw(rm_ref.as_ref().and_then(RecordMap::first))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordMapGet(
    rm_ref: TableGenRecordMapRef,
    name: *const c_char,
) -> TableGenRecordRef {
    match (rm_ref.as_ref(), name_arg(name)) {
        (Some(map), Some(name)) => raw(map.get(name)),
        _ => ptr::null(),
    }
}

/// Owned array of borrowed names; release the array (not the names) with
/// `tableGenStringArrayFree`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordMapGetKeys(
    rm_ref: TableGenRecordMapRef,
    len: *mut usize,
) -> *mut *const c_char {
    let Some(map) = rm_ref.as_ref() else {
        return ptr::null_mut();
    };
    let names: Vec<*const c_char> = map
        .records()
        .map(|record| record.c_name().as_ptr())
        .collect();
    let array = alloc_array(&names);
    if !array.is_null() {
        OWNED_STRING_ARRAYS.fetch_add(1, Ordering::Relaxed);
        if !len.is_null() {
            *len = names.len();
        }
    }
    array
}

// ------------- Record -------------
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordGetName(record_ref: TableGenRecordRef) -> *const c_char {
    record_ref
        .as_ref()
        .map_or(ptr::null(), |record| record.c_name().as_ptr())
}

/// The keeper the record belongs to (borrowed), or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordGetRecords(
    record_ref: TableGenRecordRef,
) -> TableGenRecordKeeperRef {
    record_ref.as_ref().map_or(ptr::null(), Record::keeper_ptr)
}

/// The record printed in full, as an owned string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordAsNewString(record_ref: TableGenRecordRef) -> *mut c_char {
    match record_ref.as_ref() {
        Some(record) => new_string(&record.to_string()),
        None => ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordGetValue(
    record_ref: TableGenRecordRef,
    name: *const c_char,
) -> TableGenRecordValRef {
    match (record_ref.as_ref(), name_arg(name)) {
        (Some(record), Some(name)) => raw(record.get_field(name)),
        _ => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordGetFieldType(
    record_ref: TableGenRecordRef,
    name: *const c_char,
) -> RecTyKind {
    match (record_ref.as_ref(), name_arg(name)) {
        (Some(record), Some(name)) => record.field_type(name).unwrap_or(RecTyKind::Invalid),
        _ => RecTyKind::Invalid,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordIsAnonymous(record_ref: TableGenRecordRef) -> TableGenBool {
    boolean(record_ref.as_ref().is_some_and(Record::is_anonymous))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordIsSubclassOf(
    record_ref: TableGenRecordRef,
    name: *const c_char,
) -> TableGenBool {
    match (record_ref.as_ref(), name_arg(name)) {
        (Some(record), Some(name)) => boolean(record.is_subclass_of(name)),
        _ => TABLEGEN_FALSE,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordGetFirstValue(
    record_ref: TableGenRecordRef,
) -> TableGenRecordValRef {
    raw(record_ref.as_ref().and_then(Record::first_field))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValNext(
    record: TableGenRecordRef,
    current: TableGenRecordValRef,
) -> TableGenRecordValRef {
    match (record.as_ref(), current.as_ref()) {
        (Some(record), Some(current)) => raw(record.next_field(current)),
        _ => ptr::null(),
    }
}

// ------------- RecordVal -------------
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetName(rv_ref: TableGenRecordValRef) -> *const c_char {
    rv_ref
        .as_ref()
        .map_or(ptr::null(), |field| field.c_name().as_ptr())
}

/// The declared kind of the field.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetType(rv_ref: TableGenRecordValRef) -> RecTyKind {
    rv_ref
        .as_ref()
        .map_or(RecTyKind::Invalid, RecordValue::kind)
}

/// Null when the field is unset.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValue(
    rv_ref: TableGenRecordValRef,
) -> TableGenTypedInitRef {
    raw(slot_value(rv_ref))
}

/// String and code values as an owned string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValAsNewString(
    rv_ref: TableGenRecordValRef,
) -> *mut c_char {
    tableGenStringInitGetValueNewString(tableGenRecordValGetValue(rv_ref))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValAsBit(
    rv_ref: TableGenRecordValRef,
    bit: *mut i8,
) -> TableGenBool {
    tableGenBitInitGetValue(tableGenRecordValGetValue(rv_ref), bit)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValAsBits(
    rv_ref: TableGenRecordValRef,
    len: *mut usize,
) -> *mut i8 {
    tableGenBitsInitGetValue(tableGenRecordValGetValue(rv_ref), len)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValAsInt(
    rv_ref: TableGenRecordValRef,
    integer: *mut i64,
) -> TableGenBool {
    tableGenIntInitGetValue(tableGenRecordValGetValue(rv_ref), integer)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValAsRecord(
    rv_ref: TableGenRecordValRef,
) -> TableGenRecordRef {
    tableGenDefInitGetValue(tableGenRecordValGetValue(rv_ref))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenRecordValGetValAsDefRecord(
    rv_ref: TableGenRecordValRef,
) -> TableGenRecordRef {
    tableGenRecordValGetValAsRecord(rv_ref)
}

/// Element kind of a list-typed field.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenListRecordGetType(rv_ref: TableGenRecordValRef) -> RecTyKind {
    rv_ref
        .as_ref()
        .and_then(|field| field.ty().element())
        .map_or(RecTyKind::Invalid, |element| element.kind())
}

// ------------- TypedInit -------------
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenInitRecType(ti: TableGenTypedInitRef) -> RecTyKind {
    ti.as_ref().map_or(RecTyKind::Invalid, TypedValue::kind)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenBitInitGetValue(ti: TableGenTypedInitRef, bit: *mut i8) -> TableGenBool {
    match ti.as_ref().map(TypedValue::as_bit) {
        Some(Ok(value)) if !bit.is_null() => {
            *bit = value as i8;
            TABLEGEN_TRUE
        }
        _ => TABLEGEN_FALSE,
    }
}

/// Owned array, least significant bit first; release with `tableGenBitArrayFree`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenBitsInitGetValue(ti: TableGenTypedInitRef, len: *mut usize) -> *mut i8 {
    match ti.as_ref().map(TypedValue::as_bits) {
        Some(Ok(bits)) => new_bit_array(bits, len),
        _ => ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenIntInitGetValue(
    ti: TableGenTypedInitRef,
    integer: *mut i64,
) -> TableGenBool {
    match ti.as_ref().map(TypedValue::as_int) {
        Some(Ok(value)) if !integer.is_null() => {
            *integer = value;
            TABLEGEN_TRUE
        }
        _ => TABLEGEN_FALSE,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenStringInitGetValueNewString(ti: TableGenTypedInitRef) -> *mut c_char {
    match ti.as_ref().map(TypedValue::as_str) {
        Some(Ok(text)) => new_string(text),
        _ => ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDefInitGetValue(ti: TableGenTypedInitRef) -> TableGenRecordRef {
    match ti.as_ref().map(TypedValue::as_record_ref) {
        Some(Ok(record)) => record.as_ptr(),
        _ => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenListRecordGet(
    ti: TableGenTypedInitRef,
    index: usize,
) -> TableGenTypedInitRef {
    raw(ti.as_ref().and_then(|value| value.list_element(index).ok()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenListRecordNumElements(ti: TableGenTypedInitRef) -> usize {
    ti.as_ref()
        .and_then(|value| value.list_len().ok())
        .unwrap_or(0)
}

/// Null when the argument is out of range or unset.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagRecordGet(
    ti: TableGenTypedInitRef,
    index: usize,
) -> TableGenTypedInitRef {
    raw(ti.as_ref().and_then(|value| value.dag_arg(index).ok().flatten()))
}

/// Null when the argument has no name.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagRecordArgName(
    ti: TableGenTypedInitRef,
    index: usize,
) -> *const c_char {
    let arg = ti
        .as_ref()
        .and_then(|value| value.as_dag().ok())
        .and_then(|dag| dag.args().get(index));
    arg.and_then(|arg| arg.name.as_ref())
        .map_or(ptr::null(), |name| name.as_c_str().as_ptr())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagRecordNumArgs(ti: TableGenTypedInitRef) -> usize {
    ti.as_ref()
        .and_then(|value| value.dag_num_args().ok())
        .unwrap_or(0)
}

/// The operator when it is a def, null otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagRecordOperator(ti: TableGenTypedInitRef) -> TableGenRecordRef {
    match ti.as_ref().map(TypedValue::dag_operator) {
        Some(Ok(crate::datatype::DagOperator::Def(record))) => record.as_ptr(),
        _ => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagRecordOperatorName(ti: TableGenTypedInitRef) -> *const c_char {
    match ti.as_ref().map(TypedValue::dag_operator) {
        Some(Ok(operator)) => operator.c_name().as_ptr(),
        _ => ptr::null(),
    }
}

/// Owned (name, value) view of one dag argument; release with `tableGenDagPairFree`.
pub struct DagPair {
    key: *const c_char,
    value: TableGenTypedInitRef,
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagRecordGetPair(
    ti: TableGenTypedInitRef,
    index: usize,
) -> TableGenDagPairRef {
    let arg = ti
        .as_ref()
        .and_then(|value| value.as_dag().ok())
        .and_then(|dag| dag.args().get(index));
    let Some(arg) = arg else {
        return ptr::null_mut();
    };
    OWNED_DAG_PAIRS.fetch_add(1, Ordering::Relaxed);
    Box::into_raw(Box::new(DagPair {
        key: arg
            .name
            .as_ref()
            .map_or(ptr::null(), |name| name.as_c_str().as_ptr()),
        value: raw(arg.value.as_ref()),
    }))
}

/// Borrowed from the pair; null when the argument has no name.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagPairGetKey(dp_ref: TableGenDagPairRef) -> *const c_char {
    dp_ref.as_ref().map_or(ptr::null(), |pair| pair.key)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagPairGetValue(dp_ref: TableGenDagPairRef) -> TableGenTypedInitRef {
    dp_ref.as_ref().map_or(ptr::null(), |pair| pair.value)
}

// ------------- Memory -------------
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenBitArrayFree(bit_array: *mut i8) {
    if !bit_array.is_null() {
        OWNED_BIT_ARRAYS.fetch_sub(1, Ordering::Relaxed);
        free_array(bit_array);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenStringFree(string: *mut c_char) {
    if !string.is_null() {
        OWNED_STRINGS.fetch_sub(1, Ordering::Relaxed);
        free_array(string);
    }
}

/// Releases the array only; the names stay owned by the keeper.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenStringArrayFree(string_array: *mut *const c_char) {
    if !string_array.is_null() {
        OWNED_STRING_ARRAYS.fetch_sub(1, Ordering::Relaxed);
        free_array(string_array);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tableGenDagPairFree(dp_ref: TableGenDagPairRef) {
    if !dp_ref.is_null() {
        OWNED_DAG_PAIRS.fetch_sub(1, Ordering::Relaxed);
        drop(Box::from_raw(dp_ref));
    }
}
