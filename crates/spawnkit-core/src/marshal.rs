//! Argument, environment and path marshaling.
//!
//! `execvp(3)` wants flat, null-terminated arrays of null-terminated
//! strings. They are built here, in the parent, so that the child only
//! passes pointers along and never allocates.

use spawnkit_common::{SpawnError, SpawnResult};
use std::collections::BTreeMap;
use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

/// Explicit child environment: variable name to value.
pub type Environment = BTreeMap<OsString, OsString>;

/// Owned strings plus the null-terminated pointer array that refers to them.
///
/// The pointer array stays valid for as long as this value lives; moving the
/// value does not move the string buffers.
#[derive(Debug)]
pub struct CStringArray {
    items: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStringArray {
    pub fn new(items: Vec<CString>) -> Self {
        let ptrs = items
            .iter()
            .map(|item| item.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        Self { items, ptrs }
    }

    /// Pointer to the first element of the null-terminated array.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.items.iter().map(CString::as_c_str)
    }

    /// First element, if any.
    pub fn first(&self) -> Option<&CStr> {
        self.items.first().map(CString::as_c_str)
    }
}

/// Convert one value to a C string, rejecting interior nul bytes.
pub fn to_cstring(what: &str, value: &OsStr) -> SpawnResult<CString> {
    CString::new(value.as_bytes()).map_err(|_| {
        SpawnError::validation(format!(
            "{} contains an embedded nul byte: {:?}",
            what, value
        ))
    })
}

/// Marshal the argument vector. The first element is the program name the
/// new image sees in `argv[0]`.
pub fn marshal_args<S: AsRef<OsStr>>(args: &[S]) -> SpawnResult<CStringArray> {
    if args.is_empty() {
        return Err(SpawnError::validation("argument vector must not be empty"));
    }

    let items = args
        .iter()
        .map(|arg| to_cstring("argument", arg.as_ref()))
        .collect::<SpawnResult<Vec<_>>>()?;

    Ok(CStringArray::new(items))
}

/// Marshal a path for a raw system call.
pub fn marshal_path(what: &str, path: &Path) -> SpawnResult<CString> {
    if path.as_os_str().is_empty() {
        return Err(SpawnError::validation(format!("{} must not be empty", what)));
    }
    to_cstring(what, path.as_os_str())
}

/// Marshal the child environment as `key=value` entries.
///
/// Returns `None` when the child should simply inherit the parent's
/// environment. When a working directory is requested, `PWD` is set to it,
/// which forces an explicit environment even if none was given.
pub fn marshal_env(env: Option<&Environment>, cwd: Option<&Path>) -> SpawnResult<Option<CStringArray>> {
    let pwd = match cwd {
        Some(dir) => Some(absolute_pwd(dir)?),
        None => None,
    };

    let mut vars: Environment = match (env, &pwd) {
        (Some(env), _) => env.clone(),
        (None, Some(_)) => std::env::vars_os().collect(),
        (None, None) => return Ok(None),
    };

    if let Some(pwd) = pwd {
        vars.insert(OsString::from("PWD"), pwd.into_os_string());
    }

    let items = vars
        .iter()
        .map(|(key, value)| env_entry(key, value))
        .collect::<SpawnResult<Vec<_>>>()?;

    Ok(Some(CStringArray::new(items)))
}

fn env_entry(key: &OsStr, value: &OsStr) -> SpawnResult<CString> {
    let key_bytes = key.as_bytes();
    if key_bytes.is_empty() {
        return Err(SpawnError::validation("environment variable name must not be empty"));
    }
    if key_bytes.contains(&b'=') {
        return Err(SpawnError::validation(format!(
            "environment variable name contains '=': {:?}",
            key
        )));
    }

    let mut entry = Vec::with_capacity(key_bytes.len() + 1 + value.len());
    entry.extend_from_slice(key_bytes);
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());

    CString::new(entry).map_err(|_| {
        SpawnError::validation(format!(
            "environment entry for {:?} contains an embedded nul byte",
            key
        ))
    })
}

/// `PWD` must be absolute; a relative directory is resolved against the
/// parent's current directory, which is what `chdir` in the child does too.
fn absolute_pwd(dir: &Path) -> SpawnResult<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let base = std::env::current_dir().map_err(|e| {
        SpawnError::validation(format!(
            "cannot resolve relative working directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(base.join(dir))
}
