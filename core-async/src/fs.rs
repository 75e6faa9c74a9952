//! Async filesystem helpers re-exported from Tokio.

pub use tokio::fs::{
    copy, create_dir, create_dir_all, metadata, read, read_dir, read_to_string, remove_dir,
    remove_dir_all, remove_file, rename, symlink_metadata, try_exists, write, DirEntry, File,
    OpenOptions,
};
