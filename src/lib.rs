// vkbind - checked Vulkan bindings with owned handles and a runtime video loader

pub mod backend;
pub mod config;
