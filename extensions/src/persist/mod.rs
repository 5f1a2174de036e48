//! Persist adapters.

mod json_folder;

pub use self::json_folder::JsonFolderAdapter;
