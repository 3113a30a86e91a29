// Pipeline orchestrator - drives one run from locator to finished files
//
// Items are processed strictly one after another. Inside a Video-mode item the
// two fetches run concurrently and the merge waits for both. Item failures are
// recorded and the run moves on; only resolution and prompt failures abort.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::errors::DownloadError;
use super::format_selector::{match_video_choice, select_formats, FormatChoice};
use super::models::{CollectionPolicy, DownloadMode, MediaItem, Resolution, Role, Selector};
use super::staging::StagedFiles;
use super::traits::{MetadataSource, Muxer, ProgressObserver, PromptScope, Prompter, Stage, StreamFetcher};
use super::utils::{output_path, sanitize_title};

/// Lifecycle of one item, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Selecting,
    Fetching,
    Muxing,
    Done,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Selecting => "selecting",
            Self::Fetching => "fetching",
            Self::Muxing => "muxing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn transition(locator: &str, state: ItemState) {
    tracing::debug!(item = %locator, state = %state, "item state");
}

/// Result of one item
#[derive(Debug)]
pub struct ItemOutcome {
    pub locator: String,
    /// Known once metadata resolved
    pub title: Option<String>,
    pub result: Result<PathBuf, DownloadError>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ItemOutcome>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ItemOutcome, &DownloadError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o, e)))
    }
}

pub struct Pipeline {
    source: Arc<dyn MetadataSource>,
    fetcher: Arc<dyn StreamFetcher>,
    muxer: Arc<dyn Muxer>,
    observer: Arc<dyn ProgressObserver>,
}

/// Per-item work order once every decision is made
struct Plan<'a> {
    mode: DownloadMode,
    video: Option<FormatChoice>,
    output_dir: &'a Path,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        fetcher: Arc<dyn StreamFetcher>,
        muxer: Arc<dyn Muxer>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            source,
            fetcher,
            muxer,
            observer,
        }
    }

    /// Process everything `locator` names. Errors returned here are run-level;
    /// item failures live in the summary.
    pub async fn run(&self, locator: &str, prompter: &dyn Prompter) -> Result<RunSummary, DownloadError> {
        tracing::info!(source = self.source.name(), %locator, "resolving");
        let resolution = self.source.resolve(locator).await?;

        let mut summary = RunSummary::default();
        let mut written = HashSet::new();

        match resolution {
            Resolution::SingleItem(item_locator) => {
                let outcome = self.run_single(&item_locator, prompter, &mut written).await?;
                summary.outcomes.push(outcome);
            }
            Resolution::Collection(collection) => {
                tracing::info!(title = %collection.title, items = collection.items.len(), "collection resolved");
                self.observer.on_collection(&collection);

                let mut policy: Option<CollectionPolicy> = None;
                for item_locator in &collection.items {
                    let outcome = self
                        .run_collection_item(item_locator, &mut policy, prompter, &mut written)
                        .await?;
                    summary.outcomes.push(outcome);
                }
            }
        }

        Ok(summary)
    }

    async fn run_single(
        &self,
        locator: &str,
        prompter: &dyn Prompter,
        written: &mut HashSet<PathBuf>,
    ) -> Result<ItemOutcome, DownloadError> {
        transition(locator, ItemState::Selecting);
        let item = match self.source.lookup(locator).await {
            Ok(item) => item,
            Err(e) => return Ok(self.fail(locator, None, e)),
        };
        self.observer.on_item(&item);

        let decided = (|| {
            let mode = prompter.choose_mode(PromptScope::Item)?;
            let video = match mode {
                DownloadMode::Video => {
                    let choices = select_formats(&item.formats, Role::Video)?;
                    Some(prompter.choose_video_format(&choices, PromptScope::Item)?)
                }
                DownloadMode::AudioOnly => None,
            };
            let output_dir = prompter.choose_output_dir(PromptScope::Item)?;
            Ok::<_, DownloadError>((mode, video, output_dir))
        })();

        let (mode, video, output_dir) = match decided {
            Ok(decided) => decided,
            Err(e @ DownloadError::Prompt(_)) => return Err(e),
            Err(e) => return Ok(self.fail(locator, Some(item.title.as_str()), e)),
        };

        let plan = Plan {
            mode,
            video,
            output_dir: &output_dir,
        };
        Ok(self.finish_item(&item, plan, written).await)
    }

    async fn run_collection_item(
        &self,
        locator: &str,
        policy: &mut Option<CollectionPolicy>,
        prompter: &dyn Prompter,
        written: &mut HashSet<PathBuf>,
    ) -> Result<ItemOutcome, DownloadError> {
        transition(locator, ItemState::Selecting);
        let item = match self.source.lookup(locator).await {
            Ok(item) => item,
            Err(e) => return Ok(self.fail(locator, None, e)),
        };
        self.observer.on_item(&item);

        // The first item whose metadata resolves sets the policy for the rest
        if policy.is_none() {
            match collection_policy(&item, prompter) {
                Ok(p) => {
                    tracing::info!(mode = %p.mode, output_dir = %p.output_dir.display(), "collection policy set");
                    *policy = Some(p);
                }
                Err(e @ DownloadError::Prompt(_)) => return Err(e),
                Err(e) => return Ok(self.fail(locator, Some(item.title.as_str()), e)),
            }
        }
        let Some(policy) = policy.as_ref() else {
            return Ok(self.fail(
                locator,
                Some(item.title.as_str()),
                DownloadError::Prompt("collection policy missing".to_string()),
            ));
        };

        let video = match &policy.video {
            Some(wanted) => {
                let matched = select_formats(&item.formats, Role::Video)
                    .and_then(|choices| match_video_choice(&choices, wanted));
                match matched {
                    Ok(choice) => Some(choice),
                    Err(e) => return Ok(self.fail(locator, Some(item.title.as_str()), e)),
                }
            }
            None => None,
        };

        let plan = Plan {
            mode: policy.mode,
            video,
            output_dir: &policy.output_dir,
        };
        Ok(self.finish_item(&item, plan, written).await)
    }

    /// Run one planned item and fold the result into an outcome
    async fn finish_item(&self, item: &MediaItem, plan: Plan<'_>, written: &mut HashSet<PathBuf>) -> ItemOutcome {
        let result = self.download_item(item, plan, written).await;
        match result {
            Ok(path) => {
                transition(&item.locator, ItemState::Done);
                ItemOutcome {
                    locator: item.locator.clone(),
                    title: Some(item.title.clone()),
                    result: Ok(path),
                }
            }
            Err(e) => self.fail(&item.locator, Some(item.title.as_str()), e),
        }
    }

    /// Record an item failure; the observer hears about it immediately
    fn fail(&self, locator: &str, title: Option<&str>, error: DownloadError) -> ItemOutcome {
        transition(locator, ItemState::Failed);
        tracing::warn!(item = %locator, error = %error, "item failed");
        self.observer.on_item_failed(locator, title, &error);
        ItemOutcome {
            locator: locator.to_string(),
            title: title.map(str::to_string),
            result: Err(error),
        }
    }

    async fn download_item(
        &self,
        item: &MediaItem,
        plan: Plan<'_>,
        written: &mut HashSet<PathBuf>,
    ) -> Result<PathBuf, DownloadError> {
        tokio::fs::create_dir_all(plan.output_dir)
            .await
            .map_err(|e| DownloadError::fs(plan.output_dir, e))?;

        let title = sanitize_title(&item.title);
        let output = output_path(plan.output_dir, &title, plan.mode);
        if !written.insert(output.clone()) {
            tracing::warn!(path = %output.display(), "another item of this run already wrote this path, overwriting");
        }

        match (plan.mode, plan.video) {
            (DownloadMode::Video, Some(choice)) => {
                let staged = StagedFiles::for_item(plan.output_dir, &title);
                let result = self.fetch_and_merge(item, &choice, &staged, &output).await;
                // Staged inputs go away whether or not the merge happened
                staged.cleanup().await;
                result?;
            }
            (DownloadMode::Video, None) => {
                return Err(DownloadError::NoCompatibleFormat(
                    "no video quality chosen".to_string(),
                ));
            }
            (DownloadMode::AudioOnly, _) => {
                transition(&item.locator, ItemState::Fetching);
                self.observer.on_stage(Stage::Encoding, &item.title);
                let transfer = self
                    .fetcher
                    .open(item, &Selector::BestAudio)
                    .await?
                    .observe(Role::Audio, self.observer.clone());
                transition(&item.locator, ItemState::Muxing);
                self.muxer.transcode_audio(transfer.stream, &output).await?;
            }
        }

        tracing::info!(title = %item.title, path = %output.display(), "item finished");
        Ok(output)
    }

    async fn fetch_and_merge(
        &self,
        item: &MediaItem,
        choice: &FormatChoice,
        staged: &StagedFiles,
        output: &Path,
    ) -> Result<(), DownloadError> {
        transition(&item.locator, ItemState::Fetching);
        self.observer.on_stage(Stage::Downloading, &item.title);

        let video_selector = choice.selector();
        let fetch_video = async {
            self.fetcher
                .open(item, &video_selector)
                .await?
                .observe(Role::Video, self.observer.clone())
                .save_to(staged.path(Role::Video))
                .await
        };
        let fetch_audio = async {
            self.fetcher
                .open(item, &Selector::BestAudio)
                .await?
                .observe(Role::Audio, self.observer.clone())
                .save_to(staged.path(Role::Audio))
                .await
        };

        // First failure drops the other fetch
        let (video_bytes, audio_bytes) = tokio::try_join!(fetch_video, fetch_audio)?;
        tracing::debug!(video_bytes, audio_bytes, "both streams staged");

        transition(&item.locator, ItemState::Muxing);
        self.observer.on_stage(Stage::Merging, &item.title);
        self.muxer.merge(&staged.video, &staged.audio, output).await
    }
}

/// Prompt once for everything a collection shares
fn collection_policy(item: &MediaItem, prompter: &dyn Prompter) -> Result<CollectionPolicy, DownloadError> {
    let mode = prompter.choose_mode(PromptScope::Collection)?;
    let video = match mode {
        DownloadMode::Video => {
            let choices = select_formats(&item.formats, Role::Video)?;
            let chosen = prompter.choose_video_format(&choices, PromptScope::Collection)?;
            Some(chosen.to_video_choice())
        }
        DownloadMode::AudioOnly => None,
    };
    let output_dir = prompter.choose_output_dir(PromptScope::Collection)?;

    Ok(CollectionPolicy {
        mode,
        video,
        output_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::fetcher::{ByteStream, Transfer};
    use crate::downloader::models::{Collection, StreamDescriptor, TransferProgress};
    use crate::downloader::traits::NoopObserver;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Barrier;

    fn video(id: &str, height: u32, container: &str) -> StreamDescriptor {
        StreamDescriptor {
            format_id: id.into(),
            container: container.into(),
            has_video: true,
            height: Some(height),
            vcodec: Some("avc1.4d401f".into()),
            content_length: Some(height as u64 * 10_000),
            url: format!("https://cdn/{}", id),
            ..Default::default()
        }
    }

    fn audio() -> StreamDescriptor {
        StreamDescriptor {
            format_id: "140".into(),
            container: "m4a".into(),
            has_audio: true,
            acodec: Some("mp4a.40.2".into()),
            audio_bitrate: Some(128.0),
            url: "https://cdn/140".into(),
            ..Default::default()
        }
    }

    fn item(locator: &str, title: &str, formats: Vec<StreamDescriptor>) -> MediaItem {
        MediaItem {
            locator: locator.into(),
            id: locator.rsplit('=').next().unwrap_or(locator).into(),
            title: title.into(),
            duration_secs: 60,
            author: "Tester".into(),
            view_count: Some(1),
            formats,
        }
    }

    struct FakeSource {
        collection: Option<Collection>,
        items: HashMap<String, MediaItem>,
    }

    #[async_trait]
    impl MetadataSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn resolve(&self, locator: &str) -> Result<Resolution, DownloadError> {
            if !locator.starts_with("https://") {
                return Err(DownloadError::InvalidUrl(locator.to_string()));
            }
            Ok(match &self.collection {
                Some(c) => Resolution::Collection(c.clone()),
                None => Resolution::SingleItem(locator.to_string()),
            })
        }

        async fn lookup(&self, locator: &str) -> Result<MediaItem, DownloadError> {
            self.items
                .get(locator)
                .cloned()
                .ok_or_else(|| DownloadError::Metadata(format!("unknown {}", locator)))
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        opened: Mutex<Vec<(String, Selector)>>,
        /// (item id, role) transfers that break mid-stream
        failing: HashSet<(String, Role)>,
        /// (item id, role) transfers that never finish on their own
        stalled: HashSet<(String, Role)>,
        /// Both fetches of an item must be in flight to get past this
        rendezvous: Option<Arc<Barrier>>,
    }

    #[async_trait]
    impl StreamFetcher for FakeFetcher {
        async fn open(&self, item: &MediaItem, selector: &Selector) -> Result<Transfer, DownloadError> {
            self.opened
                .lock()
                .unwrap()
                .push((item.id.clone(), selector.clone()));
            if let Some(barrier) = &self.rendezvous {
                barrier.wait().await;
            }

            let role = match selector {
                Selector::BestAudio => Role::Audio,
                Selector::Format(_) => Role::Video,
            };
            let key = (item.id.clone(), role);
            let body = Bytes::from(format!("{}:{}", item.id, selector));
            let stream: ByteStream = if self.failing.contains(&key) {
                futures::stream::iter(vec![
                    Ok(body),
                    Err(DownloadError::Transfer("connection reset".into())),
                ])
                .boxed()
            } else if self.stalled.contains(&key) {
                futures::stream::iter(vec![Ok(body)])
                    .chain(futures::stream::pending())
                    .boxed()
            } else {
                futures::stream::iter(vec![Ok(body)]).boxed()
            };
            Ok(Transfer::new(None, stream))
        }
    }

    #[derive(Default)]
    struct FakeMuxer {
        merges: Mutex<Vec<(PathBuf, PathBuf, PathBuf)>>,
        inputs_present_at_merge: Mutex<Vec<bool>>,
        transcodes: AtomicUsize,
        fail_merge: bool,
    }

    #[async_trait]
    impl Muxer for FakeMuxer {
        async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), DownloadError> {
            self.merges
                .lock()
                .unwrap()
                .push((video.to_path_buf(), audio.to_path_buf(), output.to_path_buf()));
            self.inputs_present_at_merge
                .lock()
                .unwrap()
                .push(video.exists() && audio.exists());
            if self.fail_merge {
                std::fs::write(output, b"half").unwrap();
                return Err(DownloadError::Mux("ffmpeg exited with 1".into()));
            }
            std::fs::write(output, b"merged").unwrap();
            Ok(())
        }

        async fn transcode_audio(&self, input: ByteStream, output: &Path) -> Result<(), DownloadError> {
            self.transcodes.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<Result<Bytes, DownloadError>> = input.collect().await;
            let mut data = Vec::new();
            for chunk in chunks {
                data.extend_from_slice(&chunk?);
            }
            std::fs::write(output, data).unwrap();
            Ok(())
        }
    }

    struct ScriptedPrompter {
        mode: DownloadMode,
        height: u32,
        output_dir: PathBuf,
        cancel_mode: bool,
        mode_calls: AtomicUsize,
        format_calls: AtomicUsize,
        dir_calls: AtomicUsize,
        offered: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedPrompter {
        fn new(mode: DownloadMode, height: u32, output_dir: PathBuf) -> Self {
            Self {
                mode,
                height,
                output_dir,
                cancel_mode: false,
                mode_calls: AtomicUsize::new(0),
                format_calls: AtomicUsize::new(0),
                dir_calls: AtomicUsize::new(0),
                offered: Mutex::new(Vec::new()),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn choose_mode(&self, _scope: PromptScope) -> Result<DownloadMode, DownloadError> {
            self.mode_calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_mode {
                return Err(DownloadError::Prompt("cancelled".into()));
            }
            Ok(self.mode)
        }

        fn choose_video_format(
            &self,
            choices: &[FormatChoice],
            _scope: PromptScope,
        ) -> Result<FormatChoice, DownloadError> {
            self.format_calls.fetch_add(1, Ordering::SeqCst);
            self.offered
                .lock()
                .unwrap()
                .push(choices.iter().map(|c| c.descriptor.display_quality()).collect());
            choices
                .iter()
                .find(|c| c.descriptor.height == Some(self.height))
                .cloned()
                .ok_or_else(|| DownloadError::Prompt("no such quality".into()))
        }

        fn choose_output_dir(&self, _scope: PromptScope) -> Result<PathBuf, DownloadError> {
            self.dir_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output_dir.clone())
        }
    }

    fn pipeline(source: FakeSource, fetcher: Arc<FakeFetcher>, muxer: Arc<FakeMuxer>) -> Pipeline {
        Pipeline::new(Arc::new(source), fetcher, muxer, Arc::new(NoopObserver))
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn collection_of_three(formats: impl Fn(usize) -> Vec<StreamDescriptor>) -> FakeSource {
        let locators: Vec<String> = (1..=3)
            .map(|i| format!("https://www.youtube.com/watch?v=v{}", i))
            .collect();
        let items = locators
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), item(l, &format!("Track {}", i + 1), formats(i + 1))))
            .collect();
        FakeSource {
            collection: Some(Collection {
                title: "Mix".into(),
                items: locators,
            }),
            items,
        }
    }

    #[tokio::test]
    async fn single_item_audio_only_encodes_once_without_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let downloads = tmp.path().join("downloads");
        let url = "https://www.youtube.com/watch?v=song";
        let source = FakeSource {
            collection: None,
            items: HashMap::from([(url.to_string(), item(url, "Test Song", vec![audio()]))]),
        };
        let fetcher = Arc::new(FakeFetcher::default());
        let muxer = Arc::new(FakeMuxer::default());
        let prompter = ScriptedPrompter::new(DownloadMode::AudioOnly, 0, downloads.clone());

        let summary = pipeline(source, fetcher.clone(), muxer.clone())
            .run(url, &prompter)
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 1);
        let output = summary.outcomes[0].result.as_ref().unwrap();
        assert_eq!(output, &downloads.join("Test Song.mp3"));
        assert_eq!(muxer.transcodes.load(Ordering::SeqCst), 1);
        assert!(muxer.merges.lock().unwrap().is_empty());
        assert_eq!(dir_entries(&downloads), ["Test Song.mp3"]);
        assert_eq!(
            *fetcher.opened.lock().unwrap(),
            [("song".to_string(), Selector::BestAudio)]
        );
        assert_eq!(prompter.format_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_item_video_fetches_both_streams_concurrently_then_merges() {
        let tmp = tempfile::tempdir().unwrap();
        let url = "https://www.youtube.com/watch?v=clip";
        let formats = vec![
            video("137", 1080, "mp4"),
            video("136", 720, "mp4"),
            video("244", 480, "webm"),
            audio(),
        ];
        let source = FakeSource {
            collection: None,
            items: HashMap::from([(url.to_string(), item(url, "Clip", formats))]),
        };
        let fetcher = Arc::new(FakeFetcher {
            rendezvous: Some(Arc::new(Barrier::new(2))),
            ..Default::default()
        });
        let muxer = Arc::new(FakeMuxer::default());
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 1080, tmp.path().to_path_buf());

        // Sequential fetches would never get past the barrier
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline(source, fetcher.clone(), muxer.clone()).run(url, &prompter),
        )
        .await
        .expect("fetches did not run concurrently")
        .unwrap();

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(*prompter.offered.lock().unwrap(), [vec!["1080p".to_string(), "720p".to_string()]]);

        let mut opened = fetcher.opened.lock().unwrap().clone();
        opened.sort_by_key(|(_, s)| s.to_string());
        assert_eq!(
            opened,
            [
                ("clip".to_string(), Selector::BestAudio),
                ("clip".to_string(), Selector::Format("137".into())),
            ]
        );

        let merges = muxer.merges.lock().unwrap().clone();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].0, tmp.path().join("Clip_video.tmp.mp4"));
        assert_eq!(merges[0].1, tmp.path().join("Clip_audio.tmp.mp4"));
        assert_eq!(merges[0].2, tmp.path().join("Clip.mp4"));
        assert_eq!(*muxer.inputs_present_at_merge.lock().unwrap(), [true]);

        // Staged inputs are gone once the item is done
        assert_eq!(dir_entries(tmp.path()), ["Clip.mp4"]);
    }

    #[tokio::test]
    async fn collection_reuses_first_choice_without_reprompting() {
        let tmp = tempfile::tempdir().unwrap();
        let source = collection_of_three(|_| vec![video("137", 1080, "mp4"), video("136", 720, "mp4"), audio()]);
        let fetcher = Arc::new(FakeFetcher::default());
        let muxer = Arc::new(FakeMuxer::default());
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        let summary = pipeline(source, fetcher.clone(), muxer.clone())
            .run("https://www.youtube.com/playlist?list=PL1", &prompter)
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 3);
        assert_eq!(prompter.mode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(prompter.format_calls.load(Ordering::SeqCst), 1);
        assert_eq!(prompter.dir_calls.load(Ordering::SeqCst), 1);

        let video_ids: Vec<(String, Selector)> = fetcher
            .opened
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s != Selector::BestAudio)
            .cloned()
            .collect();
        assert_eq!(
            video_ids,
            [
                ("v1".to_string(), Selector::Format("136".into())),
                ("v2".to_string(), Selector::Format("136".into())),
                ("v3".to_string(), Selector::Format("136".into())),
            ]
        );
        assert_eq!(dir_entries(tmp.path()), ["Track 1.mp4", "Track 2.mp4", "Track 3.mp4"]);
    }

    #[tokio::test]
    async fn collection_falls_back_to_same_height() {
        let tmp = tempfile::tempdir().unwrap();
        let source = collection_of_three(|i| match i {
            2 => vec![video("398", 720, "mp4"), audio()],
            3 => vec![video("137", 1080, "mp4"), audio()],
            _ => vec![video("136", 720, "mp4"), audio()],
        });
        let fetcher = Arc::new(FakeFetcher::default());
        let muxer = Arc::new(FakeMuxer::default());
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        let summary = pipeline(source, fetcher.clone(), muxer)
            .run("https://www.youtube.com/playlist?list=PL1", &prompter)
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 2);
        assert!(fetcher
            .opened
            .lock()
            .unwrap()
            .contains(&("v2".to_string(), Selector::Format("398".into()))));
        assert!(matches!(
            summary.outcomes[2].result,
            Err(DownloadError::NoCompatibleFormat(_))
        ));
    }

    #[tokio::test]
    async fn failed_item_does_not_stop_the_collection() {
        let tmp = tempfile::tempdir().unwrap();
        let source = collection_of_three(|_| vec![video("136", 720, "mp4"), audio()]);
        let fetcher = Arc::new(FakeFetcher {
            failing: HashSet::from([("v2".to_string(), Role::Video)]),
            ..Default::default()
        });
        let muxer = Arc::new(FakeMuxer::default());
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        let summary = pipeline(source, fetcher, muxer.clone())
            .run("https://www.youtube.com/playlist?list=PL1", &prompter)
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(summary.outcomes[0].result.is_ok());
        assert!(matches!(summary.outcomes[1].result, Err(DownloadError::Transfer(_))));
        assert_eq!(summary.outcomes[1].title.as_deref(), Some("Track 2"));
        assert!(summary.outcomes[2].result.is_ok());

        // No merge for the broken item, and its partial staged files are gone
        assert_eq!(muxer.merges.lock().unwrap().len(), 2);
        assert_eq!(dir_entries(tmp.path()), ["Track 1.mp4", "Track 3.mp4"]);
    }

    #[tokio::test]
    async fn failed_merge_still_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let url = "https://www.youtube.com/watch?v=clip";
        let source = FakeSource {
            collection: None,
            items: HashMap::from([(
                url.to_string(),
                item(url, "Clip", vec![video("136", 720, "mp4"), audio()]),
            )]),
        };
        let muxer = Arc::new(FakeMuxer {
            fail_merge: true,
            ..Default::default()
        });
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        let summary = pipeline(source, Arc::new(FakeFetcher::default()), muxer)
            .run(url, &prompter)
            .await
            .unwrap();

        assert_eq!(summary.failed(), 1);
        assert!(!tmp.path().join("Clip_video.tmp.mp4").exists());
        assert!(!tmp.path().join("Clip_audio.tmp.mp4").exists());
    }

    #[tokio::test]
    async fn invalid_locator_aborts_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            collection: None,
            items: HashMap::new(),
        };
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        let err = pipeline(source, Arc::new(FakeFetcher::default()), Arc::new(FakeMuxer::default()))
            .run("not a url", &prompter)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert_eq!(prompter.mode_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_prompt_aborts_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let source = collection_of_three(|_| vec![video("136", 720, "mp4"), audio()]);
        let mut prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());
        prompter.cancel_mode = true;

        let err = pipeline(source, Arc::new(FakeFetcher::default()), Arc::new(FakeMuxer::default()))
            .run("https://www.youtube.com/playlist?list=PL1", &prompter)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Prompt(_)));
    }

    #[tokio::test]
    async fn lookup_failure_is_an_item_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = collection_of_three(|_| vec![video("136", 720, "mp4"), audio()]);
        source.items.remove("https://www.youtube.com/watch?v=v1");
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        let summary = pipeline(source, Arc::new(FakeFetcher::default()), Arc::new(FakeMuxer::default()))
            .run("https://www.youtube.com/playlist?list=PL1", &prompter)
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.outcomes[0].title, None);
        // Policy came from the second item, prompted exactly once
        assert_eq!(prompter.mode_calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct CountingObserver {
        progress: Mutex<Vec<(Role, TransferProgress)>>,
        finished: Mutex<Vec<(Role, bool)>>,
        failed_items: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ProgressObserver for CountingObserver {
        fn on_progress(&self, role: Role, progress: TransferProgress) {
            self.progress.lock().unwrap().push((role, progress));
        }

        fn on_finish(&self, role: Role, ok: bool) {
            self.finished.lock().unwrap().push((role, ok));
        }

        fn on_item_failed(&self, locator: &str, title: Option<&str>, _error: &DownloadError) {
            self.failed_items
                .lock()
                .unwrap()
                .push((locator.to_string(), title.map(str::to_string)));
        }
    }

    #[tokio::test]
    async fn both_roles_report_progress_and_finish() {
        let tmp = tempfile::tempdir().unwrap();
        let url = "https://www.youtube.com/watch?v=clip";
        let source = FakeSource {
            collection: None,
            items: HashMap::from([(
                url.to_string(),
                item(url, "Clip", vec![video("136", 720, "mp4"), audio()]),
            )]),
        };
        let observer = Arc::new(CountingObserver::default());
        let pipeline = Pipeline::new(
            Arc::new(source),
            Arc::new(FakeFetcher::default()),
            Arc::new(FakeMuxer::default()),
            observer.clone(),
        );
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        pipeline.run(url, &prompter).await.unwrap();

        let progress = observer.progress.lock().unwrap();
        assert!(progress.iter().any(|(r, _)| *r == Role::Video));
        assert!(progress.iter().any(|(r, _)| *r == Role::Audio));
        let mut finished = observer.finished.lock().unwrap().clone();
        finished.sort_by_key(|(r, _)| r.as_str());
        assert_eq!(finished, [(Role::Audio, true), (Role::Video, true)]);
    }

    #[tokio::test]
    async fn audio_failure_cancels_the_video_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let url = "https://www.youtube.com/watch?v=clip";
        let source = FakeSource {
            collection: None,
            items: HashMap::from([(
                url.to_string(),
                item(url, "Clip", vec![video("136", 720, "mp4"), audio()]),
            )]),
        };
        let fetcher = Arc::new(FakeFetcher {
            failing: HashSet::from([("clip".to_string(), Role::Audio)]),
            stalled: HashSet::from([("clip".to_string(), Role::Video)]),
            ..Default::default()
        });
        let muxer = Arc::new(FakeMuxer::default());
        let observer = Arc::new(CountingObserver::default());
        let pipeline = Pipeline::new(Arc::new(source), fetcher, muxer.clone(), observer.clone());
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        // The video transfer never ends by itself; only dropping it lets the run finish
        let summary = tokio::time::timeout(Duration::from_secs(5), pipeline.run(url, &prompter))
            .await
            .expect("video fetch was not cancelled")
            .unwrap();

        assert_eq!(summary.failed(), 1);
        assert!(matches!(summary.outcomes[0].result, Err(DownloadError::Transfer(_))));
        assert!(muxer.merges.lock().unwrap().is_empty());
        assert!(dir_entries(tmp.path()).is_empty());

        let mut finished = observer.finished.lock().unwrap().clone();
        finished.sort_by_key(|(r, _)| r.as_str());
        assert_eq!(finished, [(Role::Audio, false), (Role::Video, false)]);
    }

    #[tokio::test]
    async fn observer_hears_each_failure_as_it_happens() {
        let tmp = tempfile::tempdir().unwrap();
        let source = collection_of_three(|_| vec![video("136", 720, "mp4"), audio()]);
        let fetcher = Arc::new(FakeFetcher {
            failing: HashSet::from([("v2".to_string(), Role::Video)]),
            ..Default::default()
        });
        let observer = Arc::new(CountingObserver::default());
        let pipeline = Pipeline::new(Arc::new(source), fetcher, Arc::new(FakeMuxer::default()), observer.clone());
        let prompter = ScriptedPrompter::new(DownloadMode::Video, 720, tmp.path().to_path_buf());

        pipeline
            .run("https://www.youtube.com/playlist?list=PL1", &prompter)
            .await
            .unwrap();

        assert_eq!(
            *observer.failed_items.lock().unwrap(),
            [(
                "https://www.youtube.com/watch?v=v2".to_string(),
                Some("Track 2".to_string())
            )]
        );
    }
}
