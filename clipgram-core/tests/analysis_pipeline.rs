mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use clipgram_core::analysis::{ContentBlock, NO_AUDIO_TRANSCRIPT};
use clipgram_core::pipeline::{PipelineError, FAILURE_PREAMBLE};
use clipgram_core::records::{SourceCategory, StoredFile};
use clipgram_core::store::{ObjectStore, RecordStore};

use common::{build_harness, test_config, write_script, RecordingChat, StaticInference};

/// Emulates the media toolkit: audio extraction (`-vn`) reports no track,
/// frame passes materialize three stills each.
const FFMPEG_SCRIPT: &str = r#"#!/bin/sh
case "$*" in
  *-vn*) exit 1 ;;
esac
for arg; do last="$arg"; done
dir=$(dirname "$last")
case "$last" in
  *hook_*) for i in 001 002 003; do printf 'JPEG' > "$dir/hook_$i.jpg"; done ;;
  *tail_*) for i in 001 002 003; do printf 'JPEG' > "$dir/tail_$i.jpg"; done ;;
  *) exit 1 ;;
esac
"#;

const FFPROBE_SCRIPT: &str = "#!/bin/sh\necho 45.000000\n";

async fn seed_stored_file(
    harness: &common::Harness,
    key: &str,
    title: &str,
) {
    harness
        .objects
        .put(key, b"FAKE MP4".to_vec(), "video/mp4")
        .await
        .unwrap();
    let now = Utc::now();
    harness
        .records
        .create_file_if_absent(&StoredFile {
            key: key.to_string(),
            category: SourceCategory::ClipVideo,
            title: title.to_string(),
            origin_url: "https://clips.example/v/9".to_string(),
            owner: "user-1".to_string(),
            size_mb: 0.1,
            created_at: now,
            expires_at: now + Duration::days(14),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn silent_video_analysis_uses_sentinel_and_delivers_report() {
    let base = TempDir::new().unwrap();
    let ffmpeg = base.path().join("fake-ffmpeg");
    let ffprobe = base.path().join("fake-ffprobe");
    write_script(&ffmpeg, FFMPEG_SCRIPT);
    write_script(&ffprobe, FFPROBE_SCRIPT);
    let config = test_config(base.path(), &ffmpeg, &ffmpeg, &ffprobe);

    let inference = Arc::new(StaticInference::with_responses(&[
        "a skater lands a kickflip on a sunny plaza",
        "*Hook* strong opening\n\n*Story* compact\n\n*Audio* none",
    ]));
    let harness = build_harness(
        base.path(),
        config,
        Arc::new(RecordingChat::new()),
        inference.clone(),
    );

    let key = "downloads/clip_video/Skate.mp4";
    seed_stored_file(&harness, key, "Skate").await;

    harness
        .orchestrator
        .handle_analysis("chat-1", key)
        .await
        .unwrap();

    let requests = inference.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);

    // Visual request: one text block plus one image block per frame, data
    // URIs inlined. 45s source → hook and body passes, 3 stills each.
    let visual = &requests[0];
    assert_eq!(visual.model, "vision-test");
    let images: Vec<_> = visual.messages[0]
        .content
        .iter()
        .filter(|block| matches!(block, ContentBlock::ImageUrl { .. }))
        .collect();
    assert_eq!(images.len(), 6);
    assert!(matches!(
        &visual.messages[0].content[0],
        ContentBlock::Text { .. }
    ));
    if let ContentBlock::ImageUrl { image_url } = &visual.messages[0].content[1] {
        assert!(image_url.url.starts_with("data:image/jpeg;base64,"));
    }

    // Synthesis receives the sentinel transcript verbatim, plus the visual
    // narrative, duration, and title.
    let synthesis = &requests[1];
    assert_eq!(synthesis.model, "strategist-test");
    if let ContentBlock::Text { text } = &synthesis.messages[0].content[0] {
        assert!(text.contains(NO_AUDIO_TRANSCRIPT));
        assert!(text.contains("a skater lands a kickflip"));
        assert!(text.contains("Duration: 45 seconds"));
        assert!(text.contains("Skate"));
    } else {
        panic!("synthesis prompt is not a text block");
    }

    // The report went out to the chat.
    let texts = harness.chat.message_texts();
    assert!(texts.iter().any(|text| text.contains("*Hook* strong opening")));

    // Analysis workspace cleaned up.
    let leftovers: Vec<_> = std::fs::read_dir(base.path().join("work"))
        .map(|entries| entries.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "workdir not cleaned: {leftovers:?}");
}

#[tokio::test]
async fn analysis_of_unknown_key_notifies_requester() {
    let base = TempDir::new().unwrap();
    let ffmpeg = base.path().join("fake-ffmpeg");
    write_script(&ffmpeg, FFMPEG_SCRIPT);
    let config = test_config(base.path(), &ffmpeg, &ffmpeg, &ffmpeg);
    let harness = build_harness(
        base.path(),
        config,
        Arc::new(RecordingChat::new()),
        Arc::new(StaticInference::default()),
    );

    let result = harness
        .orchestrator
        .handle_analysis("chat-1", "downloads/clip_video/Missing.mp4")
        .await;

    assert!(matches!(result, Err(PipelineError::UnknownFile(_))));
    let texts = harness.chat.message_texts();
    assert!(texts.iter().any(|text| text.starts_with(FAILURE_PREAMBLE)));
}

#[tokio::test]
async fn frame_extraction_failure_is_fatal_to_analysis() {
    let base = TempDir::new().unwrap();
    let ffmpeg = base.path().join("fake-ffmpeg");
    let ffprobe = base.path().join("fake-ffprobe");
    // Everything fails, including the frame passes.
    write_script(&ffmpeg, "#!/bin/sh\nexit 1\n");
    write_script(&ffprobe, FFPROBE_SCRIPT);
    let config = test_config(base.path(), &ffmpeg, &ffmpeg, &ffprobe);
    let harness = build_harness(
        base.path(),
        config,
        Arc::new(RecordingChat::new()),
        Arc::new(StaticInference::default()),
    );

    let key = "downloads/clip_video/Broken.mp4";
    seed_stored_file(&harness, key, "Broken").await;

    let result = harness.orchestrator.handle_analysis("chat-1", key).await;
    assert!(matches!(result, Err(PipelineError::Analysis(_))));

    // Audio degradation never masks a visual-track failure.
    let texts = harness.chat.message_texts();
    assert!(texts.iter().any(|text| text.starts_with(FAILURE_PREAMBLE)));
}
