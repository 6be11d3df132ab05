// === MODULE DEFINITION ===
// The host registers the module struct explicitly
pub mod module;
pub use module::BlogModule;

// === INTERNAL MODULES ===
#[doc(hidden)]
pub mod api;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod domain;
