// === MODULE DEFINITION ===
pub mod module;
pub use module::NotesModule;

#[doc(hidden)]
pub mod api;
