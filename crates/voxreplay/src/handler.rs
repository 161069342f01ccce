//! Command handler for workload scripts

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use voxcache::{ImageVolume, LoadError, LoadObject, PutOutcome, VolumePayload};

use crate::payload::{ReplayCache, SyntheticGeometry, SyntheticImage};
use crate::script::{Command, Reply};

type PendingPut = (String, JoinHandle<voxcache::Result<PutOutcome>>);

pub struct CommandHandler {
    cache: ReplayCache,
    pending: Vec<PendingPut>,
}

impl CommandHandler {
    pub fn new(cache: ReplayCache) -> Self {
        Self {
            cache,
            pending: Vec::new(),
        }
    }

    pub fn cache(&self) -> &ReplayCache {
        &self.cache
    }

    /// Run a whole script, writing one reply line per command
    ///
    /// # Returns
    /// * `Result<usize>` - Number of commands that replied with an error
    pub async fn replay<W: Write>(&mut self, script: &str, out: &mut W) -> Result<usize> {
        let mut errors = 0;
        for (number, line) in script.lines().enumerate() {
            let reply = match Command::parse(line) {
                Ok(Some(command)) => self.handle(command).await,
                Ok(None) => continue,
                Err(e) => {
                    warn!(line = number + 1, "parse error: {}", e);
                    Reply::error(e)
                }
            };
            if reply.is_error() {
                errors += 1;
            }
            writeln!(out, "{}", reply)?;
        }

        // Leave nothing in flight behind the script's back
        if !self.pending.is_empty() {
            let reply = self.handle_wait().await;
            writeln!(out, "{}", reply)?;
        }
        Ok(errors)
    }

    pub async fn handle(&mut self, command: Command) -> Reply {
        debug!(?command, "handling");
        match command {
            Command::Budget(bytes) => self.handle_budget(bytes),
            Command::PutImage {
                image_id,
                bytes,
                delay_ms,
            } => self.handle_put_image(image_id, bytes, delay_ms),
            Command::FailImage { image_id, delay_ms } => self.handle_fail_image(image_id, delay_ms),
            Command::PutVolume {
                volume_id,
                image_ids,
                referenced_volume_id,
            } => self.handle_put_volume(volume_id, image_ids, referenced_volume_id),
            Command::PutGeometry { geometry_id, bytes } => {
                self.handle_put_geometry(geometry_id, bytes).await
            }
            Command::GetImage(image_id) => match self.cache.image(&image_id) {
                Some(image) => Reply::value(image.size),
                None => Reply::value("MISS"),
            },
            Command::GetVolume(volume_id) => match self.cache.volume(&volume_id) {
                Some(volume) => Reply::value(volume.image_ids().join(",")),
                None => Reply::value("MISS"),
            },
            Command::GetGeometry(geometry_id) => match self.cache.geometry(&geometry_id) {
                Some(geometry) => Reply::value(geometry.size),
                None => Reply::value("MISS"),
            },
            Command::IsLoaded(image_id) => Reply::value(self.cache.is_loaded(&image_id)),
            Command::Cacheable(bytes) => Reply::value(self.cache.is_cacheable(bytes)),
            Command::RemoveImage(image_id) => {
                status(self.cache.remove_image_load_object(&image_id))
            }
            Command::RemoveVolume(volume_id) => {
                status(self.cache.remove_volume_load_object(&volume_id))
            }
            Command::RemoveGeometry(geometry_id) => {
                status(self.cache.remove_geometry_load_object(&geometry_id))
            }
            Command::Reclaim { bytes, protected } => {
                match self.cache.reclaim(bytes, protected.as_deref()) {
                    Ok(available) => Reply::value(available),
                    Err(e) => Reply::error(e),
                }
            }
            Command::FindVolume(image_id) => match self.cache.volume_containing_image_id(&image_id) {
                Some((volume, index)) => Reply::value(format!("{} {}", volume.volume_id, index)),
                None => Reply::value("NONE"),
            },
            Command::FindImage(image_id) => match self.cache.cached_image_by_uri(&image_id) {
                Some(entry) => Reply::value(entry.image_id),
                None => Reply::value("NONE"),
            },
            Command::Volumes(reference) => {
                let volumes = match reference {
                    Some(volume_id) => self.cache.filter_volumes_by_reference_id(&volume_id),
                    None => self.cache.volumes(),
                };
                let ids: Vec<&str> = volumes.iter().map(|v| v.volume_id.as_str()).collect();
                Reply::value(ids.join(","))
            }
            Command::Purge => {
                self.cache.purge_cache();
                Reply::ok()
            }
            Command::PurgeVolumes => {
                self.cache.purge_volume_cache();
                Reply::ok()
            }
            Command::Wait => self.handle_wait().await,
            Command::Size => Reply::value(format!(
                "{}/{} available {}",
                self.cache.cache_size(),
                self.cache.max_cache_size(),
                self.cache.bytes_available()
            )),
            Command::ResetStats => {
                self.cache.stats().reset();
                Reply::ok()
            }
            Command::Stats => match serde_json::to_string(&self.cache.snapshot()) {
                Ok(json) => Reply::value(json),
                Err(e) => Reply::error(e),
            },
        }
    }

    fn handle_budget(&self, bytes: u64) -> Reply {
        status(self.cache.set_max_cache_size(bytes))
    }

    fn handle_put_image(&mut self, image_id: String, bytes: u64, delay_ms: Option<u64>) -> Reply {
        let image = SyntheticImage::new(bytes);

        let Some(delay_ms) = delay_ms else {
            return status(self.cache.put_image_sync(&image_id, image));
        };

        let load = LoadObject::new(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(image)
        });
        let put = self.cache.put_image_load_object(&image_id, load);
        self.queue(image_id, put)
    }

    fn handle_fail_image(&mut self, image_id: String, delay_ms: Option<u64>) -> Reply {
        let delay = Duration::from_millis(delay_ms.unwrap_or(0));
        let message = format!("fetch of {} failed", image_id);
        let load = LoadObject::<SyntheticImage>::new(async move {
            tokio::time::sleep(delay).await;
            Err(LoadError::from(message))
        });
        let put = self.cache.put_image_load_object(&image_id, load);
        self.queue(image_id, put)
    }

    fn handle_put_volume(
        &self,
        volume_id: String,
        image_ids: Vec<String>,
        referenced_volume_id: Option<String>,
    ) -> Reply {
        let mut volume = ImageVolume::new(volume_id.clone(), image_ids, Bytes::new());
        if let Some(reference) = referenced_volume_id {
            volume = volume.with_referenced_volume_id(reference);
        }
        status(self.cache.put_volume_sync(&volume_id, volume))
    }

    async fn handle_put_geometry(&self, geometry_id: String, bytes: u64) -> Reply {
        let geometry = SyntheticGeometry::new(bytes);
        match self
            .cache
            .put_geometry_load_object(&geometry_id, LoadObject::ready(geometry))
        {
            Ok(put) => outcome(put.await),
            Err(e) => Reply::error(e),
        }
    }

    async fn handle_wait(&mut self) -> Reply {
        let (mut loaded, mut abandoned, mut failed) = (0, 0, 0);
        for (key, task) in self.pending.drain(..) {
            match task.await {
                Ok(Ok(PutOutcome::Loaded)) => loaded += 1,
                Ok(Ok(PutOutcome::Abandoned)) => abandoned += 1,
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "queued put failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "queued put panicked");
                    failed += 1;
                }
            }
        }
        Reply::value(format!(
            "loaded {} abandoned {} failed {}",
            loaded, abandoned, failed
        ))
    }

    fn queue(&mut self, key: String, put: voxcache::Result<voxcache::PutFuture>) -> Reply {
        match put {
            Ok(future) => {
                self.pending.push((key, tokio::spawn(future)));
                Reply::value("QUEUED")
            }
            Err(e) => Reply::error(e),
        }
    }
}

fn status(result: voxcache::Result<()>) -> Reply {
    match result {
        Ok(()) => Reply::ok(),
        Err(e) => Reply::error(e),
    }
}

fn outcome(result: voxcache::Result<PutOutcome>) -> Reply {
    match result {
        Ok(PutOutcome::Loaded) => Reply::ok(),
        Ok(PutOutcome::Abandoned) => Reply::value("ABANDONED"),
        Err(e) => Reply::error(e),
    }
}

/// Read a script from `path`, or from stdin when no path is given
pub async fn read_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read script {}", path.display())),
        None => {
            let mut script = String::new();
            tokio::io::stdin()
                .read_to_string(&mut script)
                .await
                .context("failed to read script from stdin")?;
            Ok(script)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler(budget: u64) -> CommandHandler {
        CommandHandler::new(ReplayCache::with_max_cache_size(budget).unwrap())
    }

    async fn run(handler: &mut CommandHandler, script: &str) -> Vec<String> {
        let mut out = Vec::new();
        handler.replay(script, &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_budget_scenario() {
        let mut handler = handler(10);
        let replies = run(
            &mut handler,
            "PUT_IMAGE a 4\n\
             PUT_IMAGE b 4\n\
             CACHEABLE 1\n\
             CACHEABLE 5\n\
             PUT_IMAGE c 5\n\
             RECLAIM 5\n\
             PUT_IMAGE c 5\n\
             SIZE\n",
        )
        .await;

        assert_eq!(replies[0], "OK");
        assert_eq!(replies[2], "OK true");
        assert_eq!(replies[3], "OK false");
        assert!(replies[4].starts_with("ERR cache size exceeded"));
        assert_eq!(replies[5], "OK 6");
        assert_eq!(replies[6], "OK");
        assert_eq!(replies[7], "OK 9/10 available 1");
    }

    #[tokio::test]
    async fn test_shared_images_and_volumes() {
        let mut handler = handler(100);
        let replies = run(
            &mut handler,
            "# two slices, one volume\n\
             PUT_IMAGE wadors:s0 5\n\
             PUT_IMAGE wadors:s1 5\n\
             PUT_VOLUME ct wadors:s0,wadors:s1\n\
             PUT_VOLUME seg a ct\n\
             REMOVE_IMAGE wadors:s0\n\
             FIND_VOLUME wadouri:s1\n\
             FIND_IMAGE dicomweb:s1\n\
             VOLUMES\n\
             VOLUMES ct\n\
             REMOVE_VOLUME ct\n\
             REMOVE_IMAGE wadors:s0\n",
        )
        .await;

        assert!(replies[4].starts_with("ERR image wadors:s0 is shared with volume ct"));
        assert_eq!(replies[5], "OK ct 1");
        assert_eq!(replies[6], "OK wadors:s1");
        assert_eq!(replies[7], "OK ct,seg");
        assert_eq!(replies[8], "OK seg");
        assert_eq!(replies[9], "OK");
        assert_eq!(replies[10], "OK");
    }

    #[tokio::test]
    async fn test_queued_loads() {
        let mut handler = handler(100);
        let replies = run(
            &mut handler,
            "PUT_IMAGE a 10 5\n\
             PUT_IMAGE a 10\n\
             IS_LOADED a\n\
             FAIL_IMAGE b 1\n\
             PUT_IMAGE c 10 50\n\
             REMOVE_IMAGE c\n\
             WAIT\n\
             IS_LOADED a\n\
             GET_IMAGE b\n",
        )
        .await;

        assert_eq!(replies[0], "OK QUEUED");
        assert_eq!(replies[1], "ERR image a already in cache");
        assert_eq!(replies[2], "OK false");
        assert_eq!(replies[6], "OK loaded 1 abandoned 1 failed 1");
        assert_eq!(replies[7], "OK true");
        assert_eq!(replies[8], "OK MISS");
    }

    #[tokio::test]
    async fn test_geometry_and_stats() {
        let mut handler = handler(100);
        let replies = run(
            &mut handler,
            "PUT_GEOMETRY mesh 64\n\
             GET_GEOMETRY mesh\n\
             REMOVE_GEOMETRY mesh\n\
             REMOVE_GEOMETRY mesh\n\
             STATS\n",
        )
        .await;

        assert_eq!(replies[0], "OK");
        assert_eq!(replies[1], "OK 64");
        assert_eq!(replies[2], "OK");
        assert_eq!(replies[3], "ERR geometry mesh was not present in the cache");

        let json: serde_json::Value =
            serde_json::from_str(replies[4].trim_start_matches("OK ")).unwrap();
        assert_eq!(json["geometries"], 0);
        assert_eq!(json["cache_size"], 0);
        assert_eq!(json["hits"], 1);
    }

    #[tokio::test]
    async fn test_oversized_put_under_default_budget() {
        let mut handler = CommandHandler::new(ReplayCache::new(Default::default()).unwrap());
        let replies = run(
            &mut handler,
            "PUT_IMAGE big 4000000000
             PUT_IMAGE huge 18446744073709551615
             PUT_IMAGE small 4000000
             GET_IMAGE small
",
        )
        .await;

        assert!(replies[0].starts_with("ERR cache size exceeded"));
        assert!(replies[1].starts_with("ERR cache size exceeded"));
        assert_eq!(replies[2], "OK");
        assert_eq!(replies[3], "OK 4000000");
        assert_eq!(handler.cache().stats().rejections(), 2);
    }

    #[tokio::test]
    async fn test_stats_reset() {
        let mut handler = handler(100);
        let replies = run(
            &mut handler,
            "PUT_IMAGE a 1
             GET_IMAGE a
             GET_IMAGE b
             STATS RESET
             GET_IMAGE a
",
        )
        .await;

        assert_eq!(replies[3], "OK");
        let stats = handler.cache().stats();
        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.inserts(), 0);
        assert!(handler.cache().is_loaded("a"));
    }

    #[tokio::test]
    async fn test_errors_are_counted() {
        let mut handler = handler(100);
        let mut out = Vec::new();
        let errors = handler
            .replay("BOGUS\nBUDGET 0\nGET_IMAGE nope\n", &mut out)
            .await
            .unwrap();

        assert_eq!(errors, 2);
        let output = String::from_utf8(out).unwrap();
        assert!(output.starts_with("ERR unknown command 'BOGUS'\n"));
        assert!(output.ends_with("OK MISS\n"));
    }

    #[tokio::test]
    async fn test_trailing_loads_are_settled() {
        let mut handler = handler(100);
        let replies = run(&mut handler, "PUT_IMAGE a 1 1\n").await;

        assert_eq!(replies, vec!["OK QUEUED", "OK loaded 1 abandoned 0 failed 0"]);
        assert!(handler.cache().is_loaded("a"));
    }

    #[tokio::test]
    async fn test_read_script_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warmup.txt");
        std::fs::write(&path, "BUDGET 64\nPUT_IMAGE a 8\n").unwrap();

        let script = read_script(Some(path.as_path())).await.unwrap();
        let mut handler = handler(10);
        let replies = run(&mut handler, &script).await;

        assert_eq!(replies, vec!["OK", "OK"]);
        assert_eq!(handler.cache().max_cache_size(), 64);

        let missing = dir.path().join("missing.txt");
        let err = read_script(Some(missing.as_path())).await.unwrap_err();
        assert!(err.to_string().contains("failed to read script"));
    }
}
