//! Content-addressed options files
//!
//! Long include and object lists are moved out of the command line into a
//! file holding one argument per line. The file name carries a hash of its
//! content, so an identical list maps to the same file and an existing file
//! is reused as is.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::BuildError;
use crate::infra::filesystem;

/// Options file for `args`, named `.<kind>_<hash>.txt` in `build_dir`
///
/// Returns the path; the file is only written if it does not exist yet.
pub fn get_or_create(build_dir: &Path, kind: &str, args: &[String]) -> Result<PathBuf, BuildError> {
    let content = render(args);
    let hash = Sha256::digest(content.as_bytes());
    let path = build_dir.join(format!(".{kind}_{}.txt", hex::encode(&hash[..16])));
    if path.is_file() {
        tracing::debug!("Reusing options file {}", path.display());
    } else {
        tracing::debug!("Writing options file {}", path.display());
        filesystem::write_file(&path, &content)?;
    }
    Ok(path)
}

/// One argument per line, quoted where the tools would otherwise split it
fn render(args: &[String]) -> String {
    let mut out = String::new();
    for arg in args {
        let arg = arg.replace('\\', "/");
        if arg.contains(' ') {
            out.push('"');
            out.push_str(&arg);
            out.push('"');
        } else {
            out.push_str(&arg);
        }
        out.push('\n');
    }
    out
}
