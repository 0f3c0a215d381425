use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::{Artifact, Bucket, Line};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cannot write {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot encode manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

pub(crate) fn io_error(path: &Path) -> impl Fn(io::Error) -> PublishError + '_ {
    move |source| PublishError::Io { path: path.to_path_buf(), source }
}

/// `<bucket>_<n>.txt`, `n` counted from 1.
pub fn chunk_name(bucket: &str, n: usize) -> String {
    format!("{bucket}_{n}.txt")
}

/// Writes each bucket as files of at most `chunk_size` lines. An empty bucket
/// still gets one empty file, and higher-numbered chunks left over from an
/// earlier, larger run are removed.
pub fn write_buckets(out_dir: &Path, buckets: &[Bucket], chunk_size: usize) -> Result<Vec<Artifact>, PublishError> {
    fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;
    let size = chunk_size.max(1);
    let mut artifacts = Vec::new();
    for bucket in buckets {
        let empty: &[Line] = &[];
        let chunks: Vec<&[Line]> = if bucket.lines.is_empty() { vec![empty] } else { bucket.lines.chunks(size).collect() };
        for (i, chunk) in chunks.iter().enumerate() {
            let name = chunk_name(&bucket.name, i + 1);
            write_lines(&out_dir.join(&name), chunk)?;
            artifacts.push(Artifact { name, bucket: bucket.name.clone(), index: i + 1, lines: chunk.len(), url: None });
        }
        let removed = remove_stale(out_dir, &bucket.name, chunks.len())?;
        info!(bucket = %bucket.name, lines = bucket.lines.len(), files = chunks.len(), removed, "bucket written");
    }
    Ok(artifacts)
}

fn write_lines(path: &Path, lines: &[Line]) -> Result<(), PublishError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut w = BufWriter::new(file);
    for line in lines {
        writeln!(w, "{}", line.text).map_err(io_error(path))?;
    }
    w.flush().map_err(io_error(path))
}

fn remove_stale(out_dir: &Path, bucket: &str, keep: usize) -> Result<usize, PublishError> {
    let prefix = format!("{bucket}_");
    let mut removed = 0;
    for entry in fs::read_dir(out_dir).map_err(io_error(out_dir))? {
        let entry = entry.map_err(io_error(out_dir))?;
        let name = entry.file_name();
        let Some(n) = name
            .to_str()
            .and_then(|s| s.strip_prefix(&prefix))
            .and_then(|s| s.strip_suffix(".txt"))
            .and_then(|s| s.parse::<usize>().ok())
        else {
            continue;
        };
        if n > keep {
            let path = entry.path();
            fs::remove_file(&path).map_err(io_error(&path))?;
            debug!(path = %path.display(), "removed stale chunk");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(name: &str, n: usize) -> Bucket {
        Bucket {
            name: name.into(),
            lines: (0..n)
                .map(|i| Line {
                    identity: format!("ss://k{i}@h{i}:1"),
                    latency_ms: i as u64,
                    label: "fast".into(),
                    text: format!("ss://k{i}@h{i}:1#fast_{i}ms"),
                })
                .collect(),
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn chunks_are_bounded_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let arts = write_buckets(dir.path(), &[bucket("all", 5)], 2).unwrap();
        let names: Vec<_> = arts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["all_1.txt", "all_2.txt", "all_3.txt"]);
        assert!(arts.iter().all(|a| a.lines <= 2));
        assert_eq!(read_lines(&dir.path().join("all_1.txt")), vec!["ss://k0@h0:1#fast_0ms", "ss://k1@h1:1#fast_1ms"]);
        assert_eq!(read_lines(&dir.path().join("all_3.txt")).len(), 1);
    }

    #[test]
    fn empty_bucket_yields_one_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let arts = write_buckets(dir.path(), &[bucket("ru", 0)], 100).unwrap();
        assert_eq!(arts.len(), 1);
        assert_eq!(arts[0].name, "ru_1.txt");
        assert_eq!(arts[0].lines, 0);
        assert_eq!(fs::read_to_string(dir.path().join("ru_1.txt")).unwrap(), "");
    }

    #[test]
    fn stale_chunks_removed() {
        let dir = tempfile::tempdir().unwrap();
        write_buckets(dir.path(), &[bucket("all", 6), bucket("all_extra", 3)], 2).unwrap();
        assert!(dir.path().join("all_3.txt").exists());
        write_buckets(dir.path(), &[bucket("all", 1)], 2).unwrap();
        assert!(dir.path().join("all_1.txt").exists());
        assert!(!dir.path().join("all_2.txt").exists());
        assert!(!dir.path().join("all_3.txt").exists());
        // other buckets sharing the prefix are untouched
        assert!(dir.path().join("all_extra_2.txt").exists());
    }
}
