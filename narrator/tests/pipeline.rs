//! End-to-end runs of the lecture pipeline against a scripted generator.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use narrator::core::config::GenerationConfig;
use narrator::core::postprocess::word_count;
use narrator::{
    CallClass, Completion, GenerationError, GenerationRequest, LecturePipeline, StoryResponse,
    TextGenerator,
};

const OUTLINE: &str = "1. Lamps and Wicks\n   a. Trimming\n      - soot\n2. The Logbook\n   a. Weather\n3. Supply Boats\n   a. Oil casks";

type Reply = Box<dyn Fn(usize) -> Result<String> + Send + Sync>;

/// Answers by call class; `n` is the 1-based index of the call within its class.
struct ScriptedGenerator {
    outline: String,
    content: Reply,
    summary: Reply,
    calls: Mutex<Vec<Completion>>,
}

impl ScriptedGenerator {
    fn new(content: Reply) -> Self {
        Self {
            outline: OUTLINE.to_string(),
            content,
            summary: Box::new(|n| Ok(format!("Summary {n}.\nUSED: Element {n}"))),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_outline(mut self, outline: &str) -> Self {
        self.outline = outline.to_string();
        self
    }

    fn calls_of(&self, class: CallClass) -> Vec<Completion> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.class == class)
            .cloned()
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, request: &Completion) -> Result<String> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.iter().filter(|c| c.class == request.class).count()
        };
        match request.class {
            CallClass::Outline => Ok(self.outline.clone()),
            CallClass::Content => (self.content)(n),
            CallClass::Utility => (self.summary)(n),
            CallClass::Topics => Ok("Salt panning in Ostia\nNight watch in Edo".to_string()),
        }
    }
}

/// Exactly 1,000 words of plain prose.
fn thousand_words(n: usize) -> String {
    (0..100)
        .map(|i| format!("keeper {n} trimmed the wick and wound clock number {i}."))
        .collect::<Vec<_>>()
        .join(" ")
}

fn pipeline(generator: &Arc<ScriptedGenerator>, config: GenerationConfig) -> LecturePipeline {
    LecturePipeline::new(generator.clone(), config)
}

#[tokio::test]
async fn lighthouse_lecture_reaches_target_with_overflow() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))));
    let config = GenerationConfig::default();
    let result = pipeline(&generator, config.clone())
        .generate("lighthouse keeping in the 1800s")
        .await
        .unwrap();

    assert_eq!(result.parts.len(), 8);
    assert!(result.total_words >= 7500);
    assert_eq!(result.total_words, result.parts.iter().map(|p| p.word_count).sum::<usize>());

    for (i, part) in result.parts.iter().enumerate() {
        assert_eq!(part.part_number, i + 1);
        assert_eq!(part.word_count, 1000);
        assert!(!part.content.contains('!'));
        for paragraph in part.content.split("\n\n") {
            assert!(word_count(paragraph) <= config.max_paragraph_words);
        }
    }

    assert_eq!(
        result.focus_areas,
        vec![
            "Lamps and Wicks",
            "The Logbook",
            "Supply Boats",
            "Additional section 1",
            "Additional section 2",
            "Additional section 3",
            "Additional section 4",
            "Additional section 5",
        ]
    );
    assert_eq!(result.parts[2].focus_area, "Supply Boats");
    assert_eq!(result.parts[7].focus_area, "Additional section 5");

    // One outline, eight chunks, and a summary after every chunk but the last.
    assert_eq!(generator.calls_of(CallClass::Outline).len(), 1);
    assert_eq!(generator.calls_of(CallClass::Content).len(), 8);
    assert_eq!(generator.calls_of(CallClass::Utility).len(), 7);
    assert_eq!(generator.total_calls(), 16);
}

#[tokio::test]
async fn overflow_targets_shrink_to_remaining_words() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))));
    pipeline(&generator, GenerationConfig::default())
        .generate("lighthouse keeping in the 1800s")
        .await
        .unwrap();

    let content = generator.calls_of(CallClass::Content);
    assert!(content[3].prompt.contains("approximately 2500 words"));
    // 7000 words written before the last chunk.
    assert!(content[7].prompt.contains("approximately 500 words"));
    assert!(content[7].prompt.contains("not already present in the outline"));
}

#[tokio::test]
async fn continuity_is_threaded_between_chunks() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| {
        Ok(format!("Chunk {n} opens. It wanders a while. Chunk {n} closes quietly."))
    })));
    let config = GenerationConfig {
        target_words: 10,
        ..GenerationConfig::default()
    };
    pipeline(&generator, config).generate("salt panning").await.unwrap();

    let content = generator.calls_of(CallClass::Content);
    assert_eq!(content.len(), 3);

    assert!(!content[0].prompt.contains("CONTINUITY"));
    assert!(content[0].prompt.contains("section 1 of the outline (Lamps and Wicks)"));
    assert_eq!(content[0].system.as_deref(), Some(narrator::core::prompts::LECTURE_SYSTEM_PROMPT));

    assert!(content[1].prompt.contains("Summary 1."));
    assert!(content[1].prompt.contains("Element 1"));
    assert!(content[1].prompt.contains("\"Chunk 1 opens. It wanders a while. Chunk 1 closes quietly.\""));

    assert!(content[2].prompt.contains("Element 1, Element 2"));
    assert!(content[2].prompt.contains("Summary 2."));

    // Target met by the third chunk: no summary after it.
    assert_eq!(generator.calls_of(CallClass::Utility).len(), 2);
}

#[tokio::test]
async fn empty_generations_hit_the_safety_cap() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|_| {
        Ok("[Continued in next section] *yawns*".to_string())
    })));
    let err = pipeline(&generator, GenerationConfig::default())
        .generate("lighthouse keeping in the 1800s")
        .await
        .unwrap_err();

    match err {
        GenerationError::DidNotConverge { attempts, total_words, target_words } => {
            assert_eq!(attempts, 20);
            assert_eq!(total_words, 0);
            assert_eq!(target_words, 7500);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(generator.calls_of(CallClass::Content).len(), 20);
    assert!(generator.calls_of(CallClass::Utility).is_empty());
}

#[tokio::test]
async fn upstream_failure_aborts_the_run() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| {
        if n == 2 {
            anyhow::bail!("LLM API Error 529: overloaded")
        }
        Ok(thousand_words(n))
    })));
    let err = pipeline(&generator, GenerationConfig::default())
        .generate("lighthouse keeping in the 1800s")
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Upstream(_)));
    assert!(err.to_string().contains("overloaded"));
    assert_eq!(generator.calls_of(CallClass::Content).len(), 2);
}

#[tokio::test]
async fn outline_fallback_labels_extra_planned_chunks() {
    let generator = Arc::new(
        ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n))))
            .with_outline("Ovens, flour and patience."),
    );
    let config = GenerationConfig {
        target_words: 3000,
        ..GenerationConfig::default()
    };
    let result = pipeline(&generator, config)
        .generate("bread baking in Pompeii")
        .await
        .unwrap();

    assert_eq!(result.focus_areas, vec!["bread baking in Pompeii"]);
    assert_eq!(result.parts.len(), 3);
    assert_eq!(result.parts[0].focus_area, "bread baking in Pompeii");
    assert_eq!(result.parts[1].focus_area, "bread baking in Pompeii, continued (part 2)");
}

#[tokio::test]
async fn focus_areas_only_makes_one_call() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))));
    let request = GenerationRequest {
        topic: "bread baking in Pompeii".to_string(),
        generate_full: false,
    };
    let response = pipeline(&generator, GenerationConfig::default())
        .handle(&request)
        .await
        .unwrap();

    match response {
        StoryResponse::FocusAreas { focus_areas } => {
            assert!((1..=3).contains(&focus_areas.len()));
            assert!(focus_areas.iter().all(|f| !f.is_empty()));
            assert_eq!(focus_areas.len(), 3);
        }
        StoryResponse::Full(_) => panic!("expected focus areas"),
    }
    assert_eq!(generator.total_calls(), 1);
}

#[tokio::test]
async fn fallback_focus_area_is_the_topic() {
    let generator = Arc::new(
        ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))).with_outline("nothing numbered"),
    );
    let areas = pipeline(&generator, GenerationConfig::default())
        .focus_areas("bread baking in Pompeii")
        .await
        .unwrap();
    assert_eq!(areas, vec!["bread baking in Pompeii"]);
}

#[tokio::test]
async fn blank_topic_fails_before_any_call() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))));
    let request = GenerationRequest {
        topic: "  ".to_string(),
        generate_full: true,
    };
    let err = pipeline(&generator, GenerationConfig::default())
        .handle(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Validation(_)));
    assert_eq!(generator.total_calls(), 0);
}

struct SlowGenerator;

#[async_trait]
impl TextGenerator for SlowGenerator {
    async fn complete(&self, _request: &Completion) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

#[tokio::test]
async fn whole_run_is_bounded_by_timeout() {
    let config = GenerationConfig {
        run_timeout_secs: 1,
        ..GenerationConfig::default()
    };
    let pipeline = LecturePipeline::new(Arc::new(SlowGenerator), config);
    let request = GenerationRequest {
        topic: "salt".to_string(),
        generate_full: true,
    };
    let err = pipeline.handle(&request).await.unwrap_err();
    assert!(matches!(err, GenerationError::Timeout(1)));
}

#[tokio::test]
async fn trace_is_written_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))));
    let config = GenerationConfig {
        target_words: 1000,
        trace_dir: Some(dir.path().to_path_buf()),
        ..GenerationConfig::default()
    };
    pipeline(&generator, config).generate("salt panning").await.unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(files.len(), 1);
    let report = std::fs::read_to_string(&files[0]).unwrap();
    assert!(report.contains("# Lecture trace: salt panning"));
    assert!(report.contains("of 1000 across"));
    assert!(report.contains("## Parts"));
    assert!(report.contains("content call"));
}

#[tokio::test]
async fn proposes_topics() {
    let generator = Arc::new(ScriptedGenerator::new(Box::new(|n| Ok(thousand_words(n)))));
    let topics = pipeline(&generator, GenerationConfig::default())
        .propose_topics(20)
        .await
        .unwrap();
    assert_eq!(topics, vec!["Salt panning in Ostia", "Night watch in Edo"]);
    assert!(generator.calls_of(CallClass::Topics)[0].prompt.contains("forgotten institutions"));
}
