// Stack lifecycle
pub mod stack;

// Package installation onto the shared filesystem
pub mod install;
