use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use vrtrainer_core::{FuserConfig, ManualClock, Role, Signal, SignalFuser};
use vrtrainer_voice::{PlaceholderStt, SttBackend, TranscriptWorker, Utterance, VoiceError, VoiceResult};

struct Failing;

#[async_trait]
impl SttBackend for Failing {
    async fn transcribe(&self, _utterance: &Utterance) -> VoiceResult<String> {
        Err(VoiceError::Stt("model not loaded".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn utterance() -> Utterance {
    Utterance::new(vec![0.2; 1_600], 16_000)
}

#[tokio::test]
async fn recognized_speech_reaches_the_fuser() {
    let mut fuser = SignalFuser::new(FuserConfig::default(), Arc::new(ManualClock::default()));
    let stt = Arc::new(PlaceholderStt::new());
    stt.script("  Good boy  ");
    stt.script("");
    stt.script("sit");
    let worker = TranscriptWorker::new(stt, fuser.speech_producer(), "trainer".into(), Role::Trainer);

    let (tx, rx) = mpsc::channel(8);
    let task = worker.spawn(rx);
    for _ in 0..3 {
        tx.send(utterance()).await.unwrap();
    }
    drop(tx);
    assert_eq!(task.await.unwrap(), 2);

    let mut heard = Vec::new();
    while let Some(ev) = fuser.next().await {
        assert_eq!(ev.origin().as_str(), "trainer");
        match ev.event.payload {
            Signal::Speech(s) => {
                assert_eq!(s.speaker_role, Role::Trainer);
                heard.push(s.text);
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }
    assert_eq!(heard, vec!["Good boy".to_string(), "sit".to_string()]);
}

#[tokio::test]
async fn backend_errors_are_skipped() {
    let mut fuser = SignalFuser::new(FuserConfig::default(), Arc::new(ManualClock::default()));
    let worker = TranscriptWorker::new(Arc::new(Failing), fuser.speech_producer(), "pet".into(), Role::Pet);

    assert!(!worker.handle(&utterance()).await);
    drop(worker);
    assert!(fuser.next().await.is_none());
}
