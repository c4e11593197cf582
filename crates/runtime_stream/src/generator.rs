//! The text-generation contract consumed by the generation runtime.

use bus::ImageAttachment;
use std::fmt;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// The request could not be delivered or the stream broke mid-way.
    Transport(String),
    /// The service answered but declined to generate.
    Refused(String),
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorError::Transport(msg) => write!(f, "generator transport failure: {msg}"),
            GeneratorError::Refused(msg) => write!(f, "generator refused: {msg}"),
        }
    }
}

impl std::error::Error for GeneratorError {}

/// Blocking stream of cumulative text: every item is the full output so far.
pub type ChunkStream = Box<dyn Iterator<Item = Result<String, GeneratorError>> + Send>;

pub trait Generator: Send + Sync {
    fn send_message_stream(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
    ) -> Result<ChunkStream, GeneratorError>;
}

/// Turns a delta stream (each item only the new text) into a cumulative one.
pub struct Cumulative<I> {
    inner: I,
    acc: String,
}

impl<I> Cumulative<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            acc: String::new(),
        }
    }
}

impl<I> Iterator for Cumulative<I>
where
    I: Iterator<Item = Result<String, GeneratorError>>,
{
    type Item = Result<String, GeneratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(delta) => {
                self.acc.push_str(&delta);
                Some(Ok(self.acc.clone()))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub delay: Duration,
    pub item: Result<String, GeneratorError>,
}

/// Replays a fixed script of cumulative chunks, sleeping before each one.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    steps: Vec<ScriptStep>,
    refuse: Option<GeneratorError>,
}

impl Scripted {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            refuse: None,
        }
    }

    /// Cumulative chunks delivered `delay` apart.
    pub fn cumulative<S: AsRef<str>>(chunks: &[S], delay: Duration) -> Self {
        Self::new(
            chunks
                .iter()
                .map(|c| ScriptStep {
                    delay,
                    item: Ok(c.as_ref().to_owned()),
                })
                .collect(),
        )
    }

    /// Delta chunks accumulated into a cumulative script.
    pub fn deltas<S: AsRef<str>>(deltas: &[S], delay: Duration) -> Self {
        let chunks: Vec<String> =
            Cumulative::new(deltas.iter().map(|d| Ok::<_, GeneratorError>(d.as_ref().to_owned())))
            .filter_map(Result::ok)
            .collect();
        Self::cumulative(&chunks, delay)
    }

    /// Parses a transcript: delta blocks separated by lines consisting of
    /// `----` only.
    pub fn from_transcript(text: &str, delay: Duration) -> Self {
        let mut blocks: Vec<String> = vec![String::new()];
        for line in text.split_inclusive('\n') {
            if line.trim_end() == "----" {
                blocks.push(String::new());
            } else if let Some(last) = blocks.last_mut() {
                last.push_str(line);
            }
        }
        blocks.retain(|b| !b.is_empty());
        Self::deltas(&blocks, delay)
    }

    /// Appends a mid-stream failure after the scripted chunks.
    pub fn then_fail(mut self, err: GeneratorError) -> Self {
        self.steps.push(ScriptStep {
            delay: Duration::ZERO,
            item: Err(err),
        });
        self
    }

    /// Fails the call itself instead of streaming.
    pub fn refusing(err: GeneratorError) -> Self {
        Self {
            steps: Vec::new(),
            refuse: Some(err),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Generator for Scripted {
    fn send_message_stream(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
    ) -> Result<ChunkStream, GeneratorError> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        log::debug!(
            target: "drift.generator",
            "scripted stream: {} steps, prompt {} bytes, {} images",
            self.steps.len(),
            prompt.len(),
            images.len()
        );
        let steps = self.steps.clone();
        Ok(Box::new(steps.into_iter().map(|step| {
            if !step.delay.is_zero() {
                thread::sleep(step.delay);
            }
            step.item
        })))
    }
}
