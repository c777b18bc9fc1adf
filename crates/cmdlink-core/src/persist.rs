//! Newline-delimited text persistence.
//!
//! History and aliases are stored as one record per line. A missing file
//! reads as empty.

use std::{io, path::Path};

use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
};

/// Read all non-empty lines of `path`, stripping trailing `\r`.
///
/// # Errors
/// Returns error if the file exists but cannot be read.
pub async fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut lines = BufReader::new(file).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    Ok(out)
}

/// Write `lines` to `path`, one per line, creating parent directories.
///
/// # Errors
/// Returns error if the directory or file cannot be written.
pub async fn write_lines<I, S>(path: &Path, lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut writer = BufWriter::new(fs::File::create(path).await?);
    for line in lines {
        writer.write_all(line.as_ref().as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(())
}
