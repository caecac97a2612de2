//! Recordkeeper – a record database for TableGen-style schema descriptions.
//!
//! A schema description declares abstract *classes* and concrete *defs*, both
//! of which are records: ordered collections of named, typed fields. Records
//! inherit fields from the classes they derive from, and may override them.
//! Parsing resolves all of that up front:
//! * A [`construct::Record`] holds its fully resolved fields and the transitive
//!   set of classes it derives from.
//! * A [`construct::RecordValue`] is a single field slot: name, declared type, value.
//! * A [`datatype::TypedValue`] is one of bit, bits, int, string, code, list,
//!   dag or a reference to another def.
//! * A [`construct::RecordKeeper`] owns all records, split into classes and defs.
//!
//! Records are owned by "keeper" structures (see the `construct` module) that
//! guarantee name uniqueness and preserve definition order, while handing out
//! shared references through `Arc`.
//!
//! ## Modules
//! * [`construct`] – Records, field slots and the keepers owning them.
//! * [`datatype`] – The closed set of value kinds and their typed accessors.
//! * [`tablegen`] – The description language (parser + resolver). Grammar details
//!   live in `tablegen.pest`.
//! * [`session`] – Owner of the keeper produced by one parse.
//! * [`interface`] – C interface with explicit ownership of every returned result.
//! * [`settings`] – Layered configuration for the command line driver.
//!
//! ## Quick Start
//! ```
//! use recordkeeper::session::Session;
//! let source = "class Base { bit flag = 1; } def Derived : Base { int count = 42; }";
//! let session = Session::open(source, Vec::<String>::new()).unwrap();
//! let derived = session.record_keeper().get_def("Derived").unwrap();
//! assert!(derived.is_subclass_of("Base"));
//! assert_eq!(derived.value_as_bit("flag").unwrap(), true);
//! assert_eq!(derived.value_as_int("count").unwrap(), 42);
//! ```
//!
//! ## Unset values
//! A field written as `?`, or depending on a template argument that was never
//! bound, has no value at all: [`construct::RecordValue::value`] returns `None`.
//! The same holds for single bits of a bit-vector and for dag arguments.
//!
//! ## License
//! Dual licensed under Apache-2.0 and MIT.

pub mod construct;
pub mod datatype;
pub mod error;
pub mod interface;
pub mod session;
pub mod settings;
pub mod tablegen;

pub use construct::{Record, RecordKeeper, RecordMap, RecordValue};
pub use datatype::{RecTy, RecTyKind, TypedValue};
pub use error::{Result, TableGenError};
pub use session::Session;
