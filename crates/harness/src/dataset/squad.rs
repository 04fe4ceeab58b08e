use super::{Dataset, NOT_APPLICABLE, expect_outputs};
use crate::cache::SampleCache;
use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::{DataFormat, ElementType};
use anyhow::Context;
use evaluation::squad::{DEFAULT_MAX_ANSWER_LENGTH, DEFAULT_N_BEST};
use evaluation::{answer_text, best_span, is_result_match};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, clap::Args)]
pub struct SquadConfig {
    /// Tokenized questions, one JSON record per line
    #[arg(long)]
    pub input_file: PathBuf,
    /// Accepted answers, one `{"qas_id", "answers"}` record per line
    #[arg(long)]
    pub groundtruth_file: Option<PathBuf>,
    /// The model emits end logits before start logits
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub end_logits_first: bool,
    #[arg(long, default_value_t = DEFAULT_N_BEST)]
    pub n_best: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_ANSWER_LENGTH)]
    pub max_answer_length: usize,
}

#[derive(Debug, Deserialize)]
struct QuestionRecord {
    qas_id: String,
    input_ids: Vec<i32>,
    input_mask: Vec<i32>,
    segment_ids: Vec<i32>,
    tokens: Vec<String>,
    /// Word-piece position to original word position, context tokens only.
    token_to_orig_map: HashMap<usize, usize>,
    doc_tokens: Vec<String>,
}

impl QuestionRecord {
    fn maps_to_document(&self, token: usize) -> bool {
        token < self.tokens.len()
            && self
                .token_to_orig_map
                .get(&token)
                .is_some_and(|&word| word < self.doc_tokens.len())
    }

    /// Answer text for a word-piece span, projected onto the original words.
    fn answer(&self, start: usize, end: usize) -> Option<String> {
        let first = *self.token_to_orig_map.get(&start)?;
        let last = *self.token_to_orig_map.get(&end)?;
        if last < first {
            return None;
        }
        Some(answer_text(
            &self.tokens[start..=end],
            &self.doc_tokens[first..=last],
        ))
    }
}

#[derive(Debug, Deserialize)]
struct AnswerRecord {
    qas_id: String,
    answers: Vec<String>,
}

/// Extractive question answering scored by exact match.
pub struct Squad {
    records: Vec<QuestionRecord>,
    cache: SampleCache,
    end_logits_first: bool,
    n_best: usize,
    max_answer_length: usize,
    answers: Option<HashMap<String, Vec<String>>>,
    predictions: HashMap<usize, String>,
}

impl Squad {
    pub fn new(
        config: &SquadConfig,
        input_format: &DataFormat,
        output_format: &DataFormat,
    ) -> anyhow::Result<Self> {
        let sequence_length = check_formats(input_format, output_format)
            .context("Question answering models take ids, mask and segments and output two logit vectors")?;

        let records: Vec<QuestionRecord> = read_json_lines(&config.input_file)?;
        if records.is_empty() {
            return Err(HarnessError::EmptyDataset)
                .with_context(|| format!("No questions in {}", config.input_file.display()));
        }
        for record in &records {
            for len in [
                record.input_ids.len(),
                record.input_mask.len(),
                record.segment_ids.len(),
            ] {
                if len != sequence_length {
                    return Err(HarnessError::TensorSizeMismatch {
                        expected: sequence_length,
                        actual: len,
                    })
                    .with_context(|| format!("Question {} has the wrong length", record.qas_id));
                }
            }
        }
        tracing::info!(questions = records.len(), sequence_length, "Loaded tokenized questions");

        let answers = config
            .groundtruth_file
            .as_deref()
            .map(read_answers)
            .transpose()?;

        Ok(Self {
            cache: SampleCache::new(input_format.clone(), records.len()),
            records,
            end_logits_first: config.end_logits_first,
            n_best: config.n_best,
            max_answer_length: config.max_answer_length,
            answers,
            predictions: HashMap::new(),
        })
    }

    /// Predicted answer text of a sample, if it produced one.
    pub fn prediction(&self, index: usize) -> Option<&str> {
        self.predictions.get(&index).map(String::as_str)
    }
}

/// Returns the shared sequence length of the three inputs.
fn check_formats(input_format: &DataFormat, output_format: &DataFormat) -> anyhow::Result<usize> {
    let [ids, mask, segments] = input_format.as_slice() else {
        return Err(HarnessError::TensorCountMismatch {
            expected: 3,
            actual: input_format.len(),
        }
        .into());
    };
    for input in [ids, mask, segments] {
        if input.element_type != ElementType::Int32 {
            return Err(HarnessError::TypeMismatch {
                expected: ElementType::Int32,
                actual: input.element_type,
            }
            .into());
        }
        if input.element_count != ids.element_count {
            return Err(HarnessError::TensorSizeMismatch {
                expected: ids.element_count,
                actual: input.element_count,
            }
            .into());
        }
    }

    if output_format.len() != 2 {
        return Err(HarnessError::TensorCountMismatch {
            expected: 2,
            actual: output_format.len(),
        }
        .into());
    }
    for output in output_format {
        if output.element_type != ElementType::Float32 {
            return Err(HarnessError::TypeMismatch {
                expected: ElementType::Float32,
                actual: output.element_type,
            }
            .into());
        }
    }
    Ok(ids.element_count)
}

fn read_json_lines<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            serde_json::from_str(line).map_err(|e| {
                anyhow::Error::from(HarnessError::InvalidGroundTruth(format!(
                    "{}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                )))
            })
        })
        .collect()
}

fn read_answers(path: &Path) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let records: Vec<AnswerRecord> = read_json_lines(path)?;
    tracing::info!(questions = records.len(), "Loaded reference answers");
    Ok(records
        .into_iter()
        .map(|record| (record.qas_id, record.answers))
        .collect())
}

impl Dataset for Squad {
    fn name(&self) -> &str {
        "squad"
    }

    fn total_sample_count(&self) -> usize {
        self.records.len()
    }

    fn load_samples_to_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        let records = &self.records;
        self.cache.load_with(indices, |index| {
            let record = &records[index];
            Ok(vec![
                DataSlot::Int32(record.input_ids.clone()),
                DataSlot::Int32(record.input_mask.clone()),
                DataSlot::Int32(record.segment_ids.clone()),
            ])
        })?;
        Ok(())
    }

    fn unload_samples_from_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        self.cache.unload(indices);
        Ok(())
    }

    fn get_data(&self, index: usize) -> Result<&[DataSlot], HarnessError> {
        self.cache.get(index)
    }

    fn process_output(&mut self, index: usize, outputs: &[DataSlot]) -> anyhow::Result<Vec<u8>> {
        expect_outputs(outputs, 2)?;
        let record = self.records.get(index).ok_or(HarnessError::SampleOutOfRange {
            index,
            total: self.records.len(),
        })?;
        let (start_logits, end_logits) = if self.end_logits_first {
            (outputs[1].as_f32()?, outputs[0].as_f32()?)
        } else {
            (outputs[0].as_f32()?, outputs[1].as_f32()?)
        };

        let span = best_span(
            start_logits,
            end_logits,
            self.n_best,
            self.max_answer_length,
            |token| record.maps_to_document(token),
        );
        let (start, end) = match span {
            Some(span) => span,
            None => {
                tracing::debug!(index, qas_id = %record.qas_id, "No valid answer span");
                self.predictions.insert(index, String::new());
                return Ok([-1i32, -1i32].iter().flat_map(|v| v.to_le_bytes()).collect());
            }
        };

        let text = record.answer(start, end).unwrap_or_default();
        tracing::trace!(index, start, end, answer = %text, "Predicted answer");
        self.predictions.insert(index, text);
        Ok([start as i32, end as i32]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect())
    }

    fn compute_accuracy_string(&self) -> String {
        let Some(answers) = &self.answers else {
            return NOT_APPLICABLE.to_string();
        };
        if self.predictions.is_empty() {
            return NOT_APPLICABLE.to_string();
        }

        let mut matched = 0usize;
        for (&index, prediction) in &self.predictions {
            let qas_id = &self.records[index].qas_id;
            match answers.get(qas_id) {
                Some(accepted) if is_result_match(accepted.as_slice(), prediction) => matched += 1,
                Some(_) => {}
                None => tracing::warn!(qas_id = %qas_id, "Question has no reference answers"),
            }
        }
        let exact_match = matched as f64 / self.predictions.len() as f64;
        format!("{:.2}% EM", exact_match * 100.0)
    }
}
