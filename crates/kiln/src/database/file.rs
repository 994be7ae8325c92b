//! A file-backed database storing one JSON record per line.
//!
//! Every committed result is appended as a new line, so the log grows with
//! each build. [`load`](Database::load) replays the log (the last record for
//! a key wins) and rewrites it with a single record per key before appending
//! again.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    config::Config, database::Database, engine::result_store::BuildResult,
    engine::timestamp::Timestamp, error::DatabaseError,
};

#[derive(Serialize)]
struct RecordRef<'a, K, V> {
    key: &'a K,
    value: &'a V,
    computed_at: Timestamp,
    built_at: Timestamp,
    dependencies: &'a [K],
}

#[derive(Deserialize)]
struct Record<K, V> {
    key: K,
    value: V,
    computed_at: Timestamp,
    built_at: Timestamp,
    dependencies: Vec<K>,
}

/// A database persisted to a JSON-lines file.
///
/// Requires the configuration's key and value types to implement `serde`'s
/// `Serialize` and `DeserializeOwned`.
#[derive(Debug)]
pub struct FileDatabase {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileDatabase {
    /// Opens the database at `path`, creating an empty file if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| io_error(&path, error))?;

        Ok(Self { path, writer: Mutex::new(None) })
    }

    /// The path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    fn append_writer(&self) -> Result<BufWriter<File>, DatabaseError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(BufWriter::new)
            .map_err(|error| io_error(&self.path, error))
    }

    fn encode<K: Serialize, V: Serialize>(
        key: &K,
        value: &V,
        computed_at: Timestamp,
        built_at: Timestamp,
        dependencies: &[K],
    ) -> Result<String, DatabaseError> {
        serde_json::to_string(&RecordRef {
            key,
            value,
            computed_at,
            built_at,
            dependencies,
        })
        .map_err(|error| DatabaseError::Encode(Arc::new(error)))
    }

    /// Rewrites the log with one line per key.
    fn compact<C: Config>(
        &self,
        results: &HashMap<C::Key, BuildResult<C>>,
    ) -> Result<(), DatabaseError>
    where
        C::Key: Serialize,
        C::Value: Serialize,
    {
        let compacted = self.path.with_extension("compact");

        let mut writer = File::create(&compacted)
            .map(BufWriter::new)
            .map_err(|error| io_error(&compacted, error))?;

        for (key, result) in results {
            let line = Self::encode(
                key,
                result.value(),
                result.computed_at(),
                result.built_at(),
                result.dependencies(),
            )?;

            writeln!(writer, "{line}")
                .map_err(|error| io_error(&compacted, error))?;
        }

        writer
            .into_inner()
            .map_err(|error| io_error(&compacted, error.into_error()))?
            .sync_all()
            .map_err(|error| io_error(&compacted, error))?;

        fs::rename(&compacted, &self.path)
            .map_err(|error| io_error(&self.path, error))
    }
}

impl<C: Config> Database<C> for FileDatabase
where
    C::Key: Serialize + DeserializeOwned,
    C::Value: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<HashMap<C::Key, BuildResult<C>>, DatabaseError> {
        let mut writer = self.writer.lock();

        // drop the append handle, the file is replaced by compaction
        writer.take();

        let file = File::open(&self.path)
            .map_err(|error| io_error(&self.path, error))?;

        let mut results = HashMap::new();

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|error| io_error(&self.path, error))?;

            if line.trim().is_empty() {
                continue;
            }

            let record: Record<C::Key, C::Value> = serde_json::from_str(&line)
                .map_err(|error| DatabaseError::Corrupt {
                    path: self.path.clone(),
                    line: index + 1,
                    source: Arc::new(error),
                })?;

            if record.built_at < record.computed_at {
                return Err(DatabaseError::Backend(format!(
                    "record at {}:{} was built before it was computed",
                    self.path.display(),
                    index + 1
                )));
            }

            results.insert(
                record.key,
                BuildResult::new(
                    record.value,
                    record.computed_at,
                    record.built_at,
                    record.dependencies,
                ),
            );
        }

        self.compact::<C>(&results)?;
        *writer = Some(self.append_writer()?);

        Ok(results)
    }

    fn store(
        &self,
        key: &C::Key,
        result: &BuildResult<C>,
    ) -> Result<(), DatabaseError> {
        let line = Self::encode(
            key,
            result.value(),
            result.computed_at(),
            result.built_at(),
            result.dependencies(),
        )?;

        let mut writer = self.writer.lock();

        if writer.is_none() {
            *writer = Some(self.append_writer()?);
        }

        let Some(writer) = writer.as_mut() else {
            unreachable!("the append writer was opened above");
        };

        // a single write of the full line keeps records whole
        writer
            .write_all(format!("{line}\n").as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|error| io_error(&self.path, error))
    }
}

fn io_error(path: &Path, error: io::Error) -> DatabaseError {
    DatabaseError::Io { path: path.to_path_buf(), source: Arc::new(error) }
}
