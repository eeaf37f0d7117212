//! Canned interview prompts offered by the shell

pub const SAMPLE_QUESTIONS: [&str; 8] = [
    "What should we know about your life story in a few sentences?",
    "What's your #1 superpower?",
    "What are the top 3 areas you'd like to grow in?",
    "What misconception do your coworkers have about you?",
    "How do you push your boundaries and limits?",
    "Tell me about a time you faced a significant challenge at work.",
    "What motivates you to do your best work?",
    "How do you handle feedback and criticism?",
];

pub fn sample_question(index: usize) -> Option<&'static str> {
    SAMPLE_QUESTIONS.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_index() {
        assert_eq!(sample_question(1), Some("What's your #1 superpower?"));
        assert_eq!(sample_question(SAMPLE_QUESTIONS.len()), None);
    }

    #[test]
    fn test_no_blank_prompts() {
        assert!(SAMPLE_QUESTIONS.iter().all(|q| !q.trim().is_empty()));
    }
}
