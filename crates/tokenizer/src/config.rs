use crate::errors::{Error, Result};
use crate::segment::{Dictionary, DictionarySegmenter, SegmenterKind};
use crate::special::default_special_tokens;
use crate::vocab::VocabLimit;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Inputs and cutoff of a vocabulary build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabConfig {
    pub inputs: Vec<PathBuf>,
    #[serde(default = "default_special_tokens")]
    pub special_tokens: Vec<String>,
    #[serde(default)]
    pub vocab_size: Option<usize>,
    #[serde(default)]
    pub min_frequency: Option<u64>,
    #[serde(default)]
    pub engine: SegmenterKind,
    /// Word list for the segmenter; one word per line.
    #[serde(default)]
    pub dictionary: Option<PathBuf>,
    pub output: PathBuf,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    #[serde(default = "default_progress")]
    pub progress: bool,
}

fn default_progress() -> bool {
    true
}

impl VocabConfig {
    pub fn new(inputs: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            inputs,
            special_tokens: default_special_tokens(),
            vocab_size: None,
            min_frequency: None,
            engine: SegmenterKind::default(),
            dictionary: None,
            output,
            manifest: None,
            progress: default_progress(),
        }
    }

    /// Loads a TOML or JSON file; relative paths resolve against the file's
    /// directory. Callers validate once any overrides are applied.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: VocabConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(Error::Validation(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.inputs.is_empty() {
            errors.push("inputs must not be empty".to_string());
        }
        for input in &self.inputs {
            if !input.is_file() {
                errors.push(format!("input file {} does not exist", input.display()));
            }
        }

        let mut seen = HashSet::new();
        for token in &self.special_tokens {
            if !seen.insert(token) {
                errors.push(format!("special token '{token}' appears multiple times"));
            }
        }

        match &self.dictionary {
            Some(dictionary) if !dictionary.is_file() => {
                errors.push(format!("dictionary {} does not exist", dictionary.display()));
            }
            Some(_) => {}
            None => errors.push(format!(
                "dictionary is required for the {} engine",
                self.engine.as_str()
            )),
        }

        if self.output.as_os_str().is_empty() {
            errors.push("output must not be empty".to_string());
        }

        if let Err(err) = self.limit() {
            errors.push(err.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors.join("; ")))
        }
    }

    pub fn limit(&self) -> Result<VocabLimit> {
        VocabLimit::from_options(self.vocab_size, self.min_frequency)
    }

    pub fn build_segmenter(&self) -> Result<DictionarySegmenter> {
        let path = self
            .dictionary
            .as_ref()
            .ok_or(Error::InvalidConfig("a segmentation dictionary is required"))?;
        Ok(DictionarySegmenter::new(self.engine, Dictionary::from_file(path)?))
    }

    fn apply_base_path(&mut self, base: &Path) {
        for input in &mut self.inputs {
            absolutize_in_place(input, base);
        }
        absolutize_in_place(&mut self.output, base);
        for path in [self.dictionary.as_mut(), self.manifest.as_mut()]
            .into_iter()
            .flatten()
        {
            absolutize_in_place(path, base);
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segmenter;
    use std::fs;

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("corpus.txt"), "สวัสดี\n").unwrap();
        let config_path = dir.path().join("vocab.toml");
        fs::write(
            &config_path,
            "inputs = [\"corpus.txt\"]\noutput = \"out/newmm.json\"\nmin_frequency = 2\nengine = \"syllable\"\n",
        )
        .unwrap();

        let config = VocabConfig::from_path(&config_path).unwrap();
        assert_eq!(config.inputs, vec![dir.path().join("corpus.txt")]);
        assert_eq!(config.output, dir.path().join("out/newmm.json"));
        assert_eq!(config.engine, SegmenterKind::Syllable);
        assert_eq!(config.special_tokens, default_special_tokens());
        assert_eq!(config.limit().unwrap(), VocabLimit::MinFrequency(2));
        assert!(config.progress);
    }

    #[test]
    fn rejects_both_cutoffs_and_missing_inputs() {
        let mut config = VocabConfig::new(vec![PathBuf::from("/nonexistent/corpus.txt")], "v.json".into());
        config.vocab_size = Some(10);
        config.min_frequency = Some(2);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("does not exist"), "{err}");
        assert!(err.contains("use only vocab_min_freq or vocab_size"), "{err}");
    }

    #[test]
    fn requires_a_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.txt");
        fs::write(&corpus, "สวัสดี\n").unwrap();
        let mut config = VocabConfig::new(vec![corpus], dir.path().join("v.json"));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("dictionary is required"), "{err}");
        assert!(matches!(config.build_segmenter(), Err(Error::InvalidConfig(_))));

        let words = dir.path().join("words.txt");
        fs::write(&words, "สวัส\nดี\n").unwrap();
        config.dictionary = Some(words);
        config.validate().unwrap();
        assert_eq!(config.build_segmenter().unwrap().segment("สวัสดี"), vec!["สวัส", "ดี"]);
    }

    #[test]
    fn loading_defers_validation_until_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("vocab.toml");
        fs::write(
            &config_path,
            "inputs = [\"missing.txt\"]\noutput = \"newmm.json\"\ndictionary = \"words.txt\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("words.txt"), "ดี\n").unwrap();

        let mut config = VocabConfig::from_path(&config_path).unwrap();
        assert!(config.validate().is_err());

        let corpus = dir.path().join("corpus.txt");
        fs::write(&corpus, "ดี\n").unwrap();
        config.inputs = vec![corpus];
        config.validate().unwrap();
    }
}
