//! Prompt templates for quiz generation and feedback synthesis

/// Per-answer line rendered into the feedback prompt
#[derive(Debug, Clone)]
pub struct AnswerBreakdown {
    pub question: String,
    pub your_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub concept: String,
}

/// Everything the feedback prompt needs about one graded attempt
#[derive(Debug, Clone)]
pub struct FeedbackContext {
    pub score: f64,
    pub total_questions: u32,
    pub correct_count: u32,
    pub time_spent_seconds: u32,
    pub attempt_number: u32,
    /// Best score on this module across the user's graded attempts
    pub best_module_score: f64,
    /// Average score across all modules of the document
    pub document_average: f64,
    /// Concepts missed in this attempt
    pub missed_concepts: Vec<String>,
    /// Concepts missed repeatedly across the whole document
    pub recurring_weak_concepts: Vec<String>,
    pub answers: Vec<AnswerBreakdown>,
}

/// Prompt builder for the generation capability
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the quiz generation prompt for one module
    pub fn build_quiz_prompt(
        title: &str,
        summary: &str,
        content: &str,
        question_count: u32,
        option_count: u32,
    ) -> String {
        let context = if summary.is_empty() { title } else { summary };

        format!(
            r#"You are an expert educator creating assessment questions.

Context: {context}
Full content: {content}

Generate {question_count} multiple-choice questions that:
1. Test deep understanding (not memorization)
2. Cover key concepts from this module
3. Have {option_count} options each
4. Distractors (wrong answers) should be:
   - Plausible (students might reasonably choose them)
   - Based on common misconceptions
   - NOT just inversions of the correct answer
   - NOT obviously wrong

For each question, also identify:
- concept_covered: specific topic being tested
- difficulty_score: 0.0 (easy) to 1.0 (hard)
- explanation: why the correct answer is right

The correct_answer field must repeat the full text of the correct option.

Return ONLY a JSON array:
[
  {{
    "question_text": "...",
    "options": ["...", "...", "...", "..."],
    "correct_answer": "...",
    "explanation": "...",
    "concept_covered": "...",
    "difficulty_score": 0.6
  }}
]"#,
            context = context,
            content = content,
            question_count = question_count,
            option_count = option_count
        )
    }

    /// Build the personalized feedback prompt for one graded attempt
    pub fn build_feedback_prompt(ctx: &FeedbackContext) -> String {
        format!(
            r#"You are an empathetic tutor providing personalized feedback to a student.

CURRENT QUIZ PERFORMANCE:
- Score: {score:.1}%
- Questions attempted: {total}
- Correct: {correct}
- Time spent: {time} seconds
- Mistakes on: {missed}

STUDENT'S LEARNING HISTORY:
- This is attempt #{attempt_number} on this module
- Previous best score on this module: {best:.1}%
- Average score across all modules in this course: {avg:.1}%
- Recurring weak areas: {weak}

INDIVIDUAL ANSWER ANALYSIS:
{answers}

TASK:
Generate encouraging, personalized feedback that:
1. Acknowledges their progress (compare to previous attempts)
2. Identifies patterns in mistakes
3. Provides specific recommendations
4. Maintains encouraging tone

Return ONLY a JSON object:
{{
  "overall_feedback": "Personalized message (2-3 sentences)",
  "strengths": ["Strength 1", "Strength 2"],
  "weaknesses": ["Weakness 1 with explanation", "Weakness 2"],
  "recommended_topics": ["Topic to review 1", "Topic 2"],
  "personalized_message": "Motivational closing message"
}}"#,
            score = ctx.score,
            total = ctx.total_questions,
            correct = ctx.correct_count,
            time = ctx.time_spent_seconds,
            missed = Self::format_concept_list(&ctx.missed_concepts),
            attempt_number = ctx.attempt_number,
            best = ctx.best_module_score,
            avg = ctx.document_average,
            weak = Self::format_concept_list(&ctx.recurring_weak_concepts),
            answers = Self::format_answer_breakdown(&ctx.answers)
        )
    }

    fn format_concept_list(concepts: &[String]) -> String {
        if concepts.is_empty() {
            "none".to_string()
        } else {
            concepts.join(", ")
        }
    }

    fn format_answer_breakdown(answers: &[AnswerBreakdown]) -> String {
        answers
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let verdict = if a.is_correct { "correct" } else { "incorrect" };
                format!(
                    "{}. [{}] {}\n   Answered: {} (correct: {}) | Concept: {}",
                    i + 1,
                    verdict,
                    a.question,
                    a.your_answer,
                    a.correct_answer,
                    a.concept
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
