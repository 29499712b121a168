// Adapters
//
// Bindings between the kernel and external record and table formats.

pub mod json;
