//! Quiz generation: prompt the generation capability per ready module,
//! validate the payload, and persist the quiz atomically.
//!
//! Generation is retried across a temperature ladder; exhausting the ladder
//! fails only this module's quiz, never the whole document.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::QuizConfig;
use crate::error::{Error, Result};
use crate::generation::{parse_question_payload, PromptBuilder};
use crate::providers::{cosine_similarity, EmbeddingProvider, LlmProvider};
use crate::storage::Database;
use crate::types::{CourseModule, Difficulty, GeneratedQuestion, Question, Quiz};

pub struct QuizGenerator {
    db: Database,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: QuizConfig,
}

impl QuizGenerator {
    pub fn new(
        db: Database,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: QuizConfig,
    ) -> Self {
        Self {
            db,
            llm,
            embedder,
            config,
        }
    }

    /// Generate and persist the quiz for one module. Quizzes are generated
    /// once: an already stored quiz is returned untouched.
    pub async fn generate_for_module(&self, module_id: Uuid) -> Result<Quiz> {
        let module = self
            .db
            .get_module(module_id)?
            .ok_or_else(|| Error::not_found(format!("Module {} not found", module_id)))?;

        if let Some(existing) = self.db.get_quiz_for_module(module_id)? {
            tracing::debug!("Module {} already has quiz {}", module_id, existing.id);
            return Ok(existing);
        }

        if !module.ready_for_quiz {
            return Err(Error::quiz_not_ready(format!(
                "Module {} has unembedded chunks",
                module_id
            )));
        }

        let content = self.module_context(&module)?;
        let prompt = PromptBuilder::build_quiz_prompt(
            &module.title,
            &module.summary,
            &content,
            self.config.questions_per_quiz as u32,
            self.config.options_per_question as u32,
        );

        let mut last_reason = String::from("no attempts made");
        for attempt in 0..self.config.max_attempts {
            let temperature = self.config.temperature_for_attempt(attempt);

            let raw = match self.llm.generate(&prompt, temperature).await {
                Ok(raw) => raw,
                Err(e) => {
                    last_reason = e.to_string();
                    tracing::warn!(
                        "Quiz generation attempt {} for module {} failed: {}",
                        attempt + 1,
                        module_id,
                        e
                    );
                    continue;
                }
            };

            let questions = match parse_question_payload(&raw) {
                Ok(questions) => questions,
                Err(e) => {
                    last_reason = e.to_string();
                    tracing::warn!(
                        "Quiz payload attempt {} for module {} was malformed: {}",
                        attempt + 1,
                        module_id,
                        e
                    );
                    continue;
                }
            };

            match self.validate_question_set(&questions).await {
                Ok(quality_scores) => {
                    return self.persist_quiz(&module, questions, quality_scores);
                }
                Err(reason) => {
                    tracing::warn!(
                        "Question set attempt {} for module {} rejected: {}",
                        attempt + 1,
                        module_id,
                        reason
                    );
                    last_reason = reason;
                }
            }
        }

        Err(Error::generation(format!(
            "Quiz for module {} failed after {} attempts: {}",
            module_id, self.config.max_attempts, last_reason
        )))
    }

    /// Concatenated module chunk text, capped for the prompt
    fn module_context(&self, module: &CourseModule) -> Result<String> {
        let chunks = self.db.list_module_chunks(module.id)?;
        let mut content = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        if content.len() > self.config.max_context_chars {
            let mut cut = self.config.max_context_chars;
            while cut > 0 && !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
        }
        if content.is_empty() {
            content = module.summary.clone();
        }
        Ok(content)
    }

    /// Validate the whole question set. Returns each question's distractor
    /// quality score, or the rejection reason for the retry log.
    async fn validate_question_set(
        &self,
        questions: &[GeneratedQuestion],
    ) -> std::result::Result<Vec<f64>, String> {
        if questions.len() != self.config.questions_per_quiz {
            return Err(format!(
                "Expected {} questions, got {}",
                self.config.questions_per_quiz,
                questions.len()
            ));
        }

        let mut seen_concepts = Vec::new();
        for question in questions {
            let concept = question.concept_covered.trim().to_lowercase();
            if !concept.is_empty() && seen_concepts.contains(&concept) {
                return Err(format!("Duplicate concept '{}'", question.concept_covered));
            }
            seen_concepts.push(concept);
        }

        let mut quality_scores = Vec::with_capacity(questions.len());
        for question in questions {
            quality_scores.push(self.validate_question(question).await?);
        }
        Ok(quality_scores)
    }

    async fn validate_question(
        &self,
        question: &GeneratedQuestion,
    ) -> std::result::Result<f64, String> {
        if question.options.len() != self.config.options_per_question {
            return Err(format!(
                "Expected {} options, got {}",
                self.config.options_per_question,
                question.options.len()
            ));
        }

        let normalized: Vec<String> = question
            .options
            .iter()
            .map(|o| o.trim().to_lowercase())
            .collect();
        for (i, option) in normalized.iter().enumerate() {
            if option.is_empty() {
                return Err("Empty option text".to_string());
            }
            if normalized[..i].contains(option) {
                return Err(format!("Options are not distinct: '{}'", question.options[i]));
            }
        }

        let correct = question.correct_answer.trim();
        let correct_idx = match question.options.iter().position(|o| o.trim() == correct) {
            Some(idx) => idx,
            None => return Err("correct_answer does not match any option".to_string()),
        };

        if has_inverse_option(question) {
            return Err("Contains an inverse of the correct answer".to_string());
        }

        // Distractors too close to the correct option make the question
        // unanswerable; compare them in embedding space.
        let embeddings = self
            .embedder
            .embed_batch(&question.options)
            .await
            .map_err(|e| format!("Option embedding failed: {}", e))?;

        let correct_emb = &embeddings[correct_idx];
        let mut max_similarity = 0.0f32;
        for (i, emb) in embeddings.iter().enumerate() {
            if i == correct_idx {
                continue;
            }
            let sim = cosine_similarity(emb, correct_emb);
            if sim > self.config.max_distractor_similarity {
                return Err(format!(
                    "Distractor '{}' too similar to the correct answer ({:.2})",
                    question.options[i], sim
                ));
            }
            max_similarity = max_similarity.max(sim);
        }

        Ok((1.0 - max_similarity) as f64)
    }

    fn persist_quiz(
        &self,
        module: &CourseModule,
        questions: Vec<GeneratedQuestion>,
        quality_scores: Vec<f64>,
    ) -> Result<Quiz> {
        let quiz = Quiz::new(
            module.id,
            Difficulty::Medium,
            questions.len() as u32,
            self.config.estimated_duration_minutes,
        );

        let rows: Vec<Question> = questions
            .into_iter()
            .zip(quality_scores)
            .enumerate()
            .map(|(i, (q, quality))| Question {
                id: Uuid::new_v4(),
                quiz_id: quiz.id,
                question_text: q.question_text,
                options: q.options,
                correct_answer: q.correct_answer,
                explanation: q.explanation,
                concept_covered: q.concept_covered,
                difficulty_score: q.difficulty_score,
                distractor_quality_score: quality,
                question_order: i as u32 + 1,
            })
            .collect();

        self.db.insert_quiz(&quiz, &rows)?;
        tracing::info!(
            "Generated quiz {} with {} questions for module {}",
            quiz.id,
            rows.len(),
            module.id
        );
        Ok(quiz)
    }
}

/// Detect "Not X" style options that merely invert the correct answer
fn has_inverse_option(question: &GeneratedQuestion) -> bool {
    let correct = question.correct_answer.trim().to_lowercase();
    question.options.iter().any(|opt| {
        opt.trim()
            .to_lowercase()
            .strip_prefix("not ")
            .map(|core| core.trim() == correct)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashEmbedder;
    use crate::types::{Chunk, Document, SourceFormat};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// LLM stub that serves canned responses in order and records the
    /// temperature of every call
    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
        temperatures: Mutex<Vec<f32>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, _prompt: &str, temperature: f32) -> Result<String> {
            self.temperatures.lock().push(temperature);
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| Error::generation("Script exhausted".to_string()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn valid_payload() -> String {
        let questions: Vec<serde_json::Value> = (0..5)
            .map(|i| {
                serde_json::json!({
                    "question_text": format!("Question number {}?", i),
                    "options": [
                        format!("Right answer {}", i),
                        format!("Rocks and rivers {}", i),
                        format!("Clouds and wind {}", i),
                        format!("Sand and glass {}", i)
                    ],
                    "correct_answer": format!("Right answer {}", i),
                    "explanation": "Because the module says so.",
                    "concept_covered": format!("Concept {}", i),
                    "difficulty_score": 0.5
                })
            })
            .collect();
        serde_json::to_string(&questions).unwrap()
    }

    fn seed_ready_module(db: &Database) -> Uuid {
        let doc = Document::new(
            "tester".to_string(),
            "notes.txt".to_string(),
            "blob-q".to_string(),
            "hash-q".to_string(),
            64,
            SourceFormat::Txt,
        );
        let document_id = doc.id;
        db.insert_document(&doc).unwrap();

        let chunks = vec![
            Chunk::new(document_id, "Cells are the unit of life.".to_string(), 0, 0, 27),
            Chunk::new(document_id, "Organelles divide the labor.".to_string(), 1, 27, 55),
        ];
        db.insert_chunks(&chunks).unwrap();
        for chunk in &chunks {
            db.set_chunk_embedding(chunk.id, &[1.0, 0.0]).unwrap();
        }

        let mut module = CourseModule::new(
            document_id,
            "Cell Biology".to_string(),
            "Cells are the unit of life.".to_string(),
            1,
        );
        module.total_chunks = 2;
        module.ready_for_quiz = true;
        let module_id = module.id;
        let assignments: Vec<(Uuid, Uuid)> = chunks.iter().map(|c| (c.id, module_id)).collect();
        db.replace_modules(document_id, &[module], &assignments)
            .unwrap();
        module_id
    }

    fn generator_with(db: &Database, llm: Arc<dyn LlmProvider>) -> QuizGenerator {
        QuizGenerator::new(
            db.clone(),
            llm,
            Arc::new(HashEmbedder::new(32)),
            QuizConfig::default(),
        )
    }

    #[tokio::test]
    async fn valid_payload_becomes_a_persisted_quiz() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);
        let llm = Arc::new(ScriptedLlm::new(vec![valid_payload()]));

        let quiz = generator_with(&db, llm).generate_for_module(module_id).await.unwrap();

        assert_eq!(quiz.total_questions, 5);
        let questions = db.list_questions(quiz.id).unwrap();
        assert_eq!(questions.len(), 5);
        assert_eq!(
            questions.iter().map(|q| q.question_order).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        for q in &questions {
            assert_eq!(q.options.len(), 4);
            assert!(q.options.contains(&q.correct_answer));
            assert!(q.distractor_quality_score > 0.0);
        }
    }

    #[tokio::test]
    async fn existing_quiz_is_returned_without_regeneration() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);

        let llm = Arc::new(ScriptedLlm::new(vec![valid_payload()]));
        let generator = generator_with(&db, llm.clone());
        let first = generator.generate_for_module(module_id).await.unwrap();
        let second = generator.generate_for_module(module_id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(llm.temperatures.lock().len(), 1, "no second model call");
    }

    #[tokio::test]
    async fn retries_walk_the_temperature_ladder() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);

        // First two responses are unusable, third is valid
        let llm = Arc::new(ScriptedLlm::new(vec![
            "I refuse to answer in JSON.".to_string(),
            r#"[{"question_text": "Only one?", "options": ["a", "b", "c", "d"], "correct_answer": "a"}]"#.to_string(),
            valid_payload(),
        ]));

        let quiz = generator_with(&db, llm.clone())
            .generate_for_module(module_id)
            .await
            .unwrap();
        assert_eq!(quiz.total_questions, 5);
        assert_eq!(*llm.temperatures.lock(), vec![0.7, 0.8, 0.9]);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_no_quiz_behind() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);

        let llm = Arc::new(ScriptedLlm::new(vec!["nope".into(), "still nope".into(), "never".into()]));
        let err = generator_with(&db, llm)
            .generate_for_module(module_id)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Generation(_)));
        assert!(db.get_quiz_for_module(module_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn inverse_options_are_rejected() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);

        let mut bad: Vec<serde_json::Value> = serde_json::from_str(&valid_payload()).unwrap();
        bad[0]["options"][1] = serde_json::json!("Not Right answer 0");
        let payload = serde_json::to_string(&bad).unwrap();

        // Same bad payload on every rung of the ladder
        let llm = Arc::new(ScriptedLlm::new(vec![payload.clone(), payload.clone(), payload]));
        let err = generator_with(&db, llm)
            .generate_for_module(module_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("inverse"));
    }

    #[tokio::test]
    async fn duplicate_options_are_rejected() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);

        let mut bad: Vec<serde_json::Value> = serde_json::from_str(&valid_payload()).unwrap();
        bad[2]["options"][3] = bad[2]["options"][2].clone();
        let payload = serde_json::to_string(&bad).unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![payload.clone(), payload.clone(), payload]));
        let err = generator_with(&db, llm)
            .generate_for_module(module_id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not distinct"));
    }

    #[tokio::test]
    async fn unready_module_is_refused() {
        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);
        db.set_module_ready(module_id, false).unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![valid_payload()]));
        let err = generator_with(&db, llm)
            .generate_for_module(module_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuizNotReady(_)));
    }

    #[tokio::test]
    async fn near_identical_distractor_is_rejected() {
        struct PlantedEmbedder;

        #[async_trait]
        impl EmbeddingProvider for PlantedEmbedder {
            async fn embed(&self, text: &str) -> Result<Vec<f32>> {
                // The planted distractor points almost exactly at the
                // correct option; everything else is orthogonal.
                if text.starts_with("Right answer") {
                    Ok(vec![1.0, 0.0])
                } else if text.starts_with("Nearly right") {
                    Ok(vec![0.99, 0.14])
                } else {
                    Ok(vec![0.0, 1.0])
                }
            }

            fn dimensions(&self) -> usize {
                2
            }

            async fn health_check(&self) -> Result<bool> {
                Ok(true)
            }

            fn name(&self) -> &str {
                "planted"
            }
        }

        let db = Database::in_memory().unwrap();
        let module_id = seed_ready_module(&db);

        let mut bad: Vec<serde_json::Value> = serde_json::from_str(&valid_payload()).unwrap();
        bad[0]["options"][1] = serde_json::json!("Nearly right answer 0");
        let payload = serde_json::to_string(&bad).unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![payload.clone(), payload.clone(), payload]));

        let generator = QuizGenerator::new(
            db.clone(),
            llm,
            Arc::new(PlantedEmbedder),
            QuizConfig::default(),
        );
        let err = generator.generate_for_module(module_id).await.unwrap_err();
        assert!(err.to_string().contains("too similar"));
    }
}
