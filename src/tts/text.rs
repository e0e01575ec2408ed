//! Text preparation: phonemization with espeak-ng and mapping to model token ids.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use tracing::debug;

use crate::error::{TtsError, TtsResult};

/// Symbols understood by the acoustic model, in token-id order (id 0 is padding).
const PHONEME_SYMBOLS: &str = concat!(
    "_",
    "!'(),.:;? ",
    "-",
    "iyɨʉɯuɪʏʊeøɘəɵɤoɛœɜɞʌɔæɐaɶɑɒᵻ",
    "ʘɓǀɗǃʄǂɠǁʛ",
    "pbtdʈɖcɟkɡqɢʔɴŋɲɳnɱmʙrʀⱱɾɽɸβfvθðszʃʒʂʐçʝxɣχʁħʕhɦɬɮʋɹɻjɰlɭʎʟ",
    "ˈˌːˑ",
    "ʍwɥʜʢʡɕʑɺɧ",
    "ɚ˞ɫ",
);

/// Punctuation kept verbatim between phonemized segments.
const KEPT_PUNCTUATION: &str = "!(),.:;?";

static SYMBOL_IDS: LazyLock<HashMap<char, i64>> =
    LazyLock::new(|| PHONEME_SYMBOLS.chars().enumerate().map(|(i, c)| (c, i as i64)).collect());

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(target_os = "windows")]
const LIBRARY_PATH_VAR: &str = "PATH";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Converts raw text into the token sequence consumed by the acoustic model.
pub trait TextPreparer: Send + Sync {
    fn prepare(&self, text: &str) -> TtsResult<Vec<i64>>;
}

/// Phonemizes text with the espeak-ng executable.
pub struct EspeakPreparer {
    program: PathBuf,         // espeak-ng executable
    library: Option<PathBuf>, // native library, its directory is added to the search path
    voice: String,            // espeak voice, e.g. "en-us"
}

impl EspeakPreparer {
    pub fn new(program: PathBuf, library: Option<PathBuf>, voice: impl Into<String>) -> Self {
        Self { program, library, voice: voice.into() }
    }

    fn phonemize(&self, segment: &str) -> TtsResult<String> {
        let mut command = Command::new(&self.program);
        command
            .args(["-q", "--ipa", "--stdin", "-v", &self.voice])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = self.library.as_ref().and_then(|lib| lib.parent()) {
            command.env(LIBRARY_PATH_VAR, dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TtsError::Inference(format!("failed to run phonemizer '{}': {}", self.program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(segment.as_bytes())
                .map_err(|e| TtsError::Inference(format!("failed to write to phonemizer: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TtsError::Inference(format!("phonemizer did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::Inference(format!("phonemizer '{}' failed: {}", self.program.display(), stderr.trim())));
        }

        let phonemes = String::from_utf8_lossy(&output.stdout);
        Ok(phonemes.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

impl TextPreparer for EspeakPreparer {
    fn prepare(&self, text: &str) -> TtsResult<Vec<i64>> {
        let mut phonemes = String::new();

        for segment in split_on_punctuation(text) {
            match segment {
                Segment::Words(words) => {
                    let ipa = self.phonemize(&words)?;
                    if !phonemes.is_empty() && !phonemes.ends_with(' ') {
                        phonemes.push(' ');
                    }
                    phonemes.push_str(&ipa);
                }
                Segment::Punctuation(c) => phonemes.push(c),
            }
        }

        debug!("Phonemes: {}", phonemes);

        let tokens = tokenize_phonemes(&phonemes);
        if tokens.is_empty() {
            return Err(TtsError::Inference(format!("no phonemes produced for \"{}\"", text)));
        }
        Ok(tokens)
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Words(String),
    Punctuation(char),
}

/// Split text into word runs and kept punctuation, collapsing whitespace.
fn split_on_punctuation(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, segments: &mut Vec<Segment>| {
        let words = current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !words.is_empty() {
            segments.push(Segment::Words(words));
        }
        current.clear();
    };

    for c in text.chars() {
        if KEPT_PUNCTUATION.contains(c) {
            flush(&mut current, &mut segments);
            segments.push(Segment::Punctuation(c));
        } else {
            current.push(c);
        }
    }
    flush(&mut current, &mut segments);

    segments
}

/// Map phoneme characters to token ids, dropping symbols the model does not know.
pub fn tokenize_phonemes(phonemes: &str) -> Vec<i64> {
    phonemes.chars().filter_map(|c| SYMBOL_IDS.get(&c).copied()).collect()
}
