//! Property-based laws for the pure services.

use proptest::prelude::*;

use aidf::domain::models::config::ConversationConfig;
use aidf::domain::models::task::TaskSpec;
use aidf::services::conversation_window::{ConversationWindow, Message};
use aidf::services::dedup_cache::prompt_hash;
use aidf::services::secret_scanner::shannon_entropy;

proptest! {
    /// Entropy is 0 exactly for strings of one repeated character.
    #[test]
    fn entropy_zero_iff_single_symbol(c in any::<char>(), len in 1usize..64) {
        let s: String = std::iter::repeat(c).take(len).collect();
        prop_assert!(shannon_entropy(&s).abs() < 1e-9);
    }

    /// Entropy never exceeds log2 of the symbol count and is non-negative.
    #[test]
    fn entropy_is_bounded(s in ".{1,128}") {
        let entropy = shannon_entropy(&s);
        let distinct = s.chars().collect::<std::collections::HashSet<_>>().len() as f64;
        prop_assert!(entropy >= 0.0);
        prop_assert!(entropy <= distinct.log2() + 1e-9);
    }

    /// The dedup key is 16 lowercase hex chars, stable per input.
    #[test]
    fn prompt_hash_shape(s in ".{0,200}") {
        let hash = prompt_hash(&s);
        prop_assert_eq!(hash.len(), 16);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        prop_assert_eq!(hash, prompt_hash(&s));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Trim preserves the head and tail untouched, and the metric equation
    /// `evicted = total - preserved` holds whenever no summary is inserted.
    #[test]
    fn window_trim_laws(
        total in 0usize..120,
        max in 1usize..60,
        first in 0usize..8,
        last in 0usize..30,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let messages: Vec<Message> =
                (0..total).map(|i| Message::user(format!("m{i}"))).collect();
            let mut window = ConversationWindow::new(ConversationConfig {
                max_messages: max,
                preserve_first_n: first,
                preserve_last_n: last,
                summarize_on_trim: false,
            });
            let (trimmed, metrics) = window.trim(messages.clone()).await;

            prop_assert_eq!(metrics.total_messages, total);
            prop_assert_eq!(metrics.preserved_messages, trimmed.len());
            prop_assert_eq!(metrics.evicted_messages, total - trimmed.len());

            if total <= max {
                prop_assert_eq!(&trimmed, &messages);
            } else {
                let first_n = first.min(total);
                let last_n = last.min(total - first_n);
                prop_assert_eq!(&trimmed[..first_n], &messages[..first_n]);
                if last_n > 0 {
                    prop_assert_eq!(
                        &trimmed[trimmed.len() - last_n..],
                        &messages[total - last_n..]
                    );
                }
                prop_assert!(trimmed.len() <= max.max(first_n + last_n));
            }
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Frontmatter parse → render → parse is the identity on the parsed
    /// representation.
    #[test]
    fn frontmatter_roundtrip(
        id in "[a-z0-9]{1,8}",
        title in "[A-Za-z][A-Za-z ]{0,30}",
        deps in proptest::collection::vec("[a-z0-9]{1,6}", 0..4),
        allowed in proptest::collection::vec("[a-z]{1,8}/\\*\\*", 0..3),
        goal in "[A-Za-z][A-Za-z .]{0,60}",
    ) {
        let mut fm = format!("---\nid: \"{id}\"\ntitle: {title}\n");
        if !deps.is_empty() {
            fm.push_str("depends_on:\n");
            for d in &deps {
                fm.push_str(&format!("  - \"{d}\"\n"));
            }
        }
        if !allowed.is_empty() {
            fm.push_str("scope:\n  allowed:\n");
            for a in &allowed {
                fm.push_str(&format!("    - \"{a}\"\n"));
            }
        }
        fm.push_str("---\n\n");
        let content = format!("{fm}# {title}\n\n## Goal\n\n{goal}\n");

        let source = std::path::PathBuf::from(format!("{id}.md"));
        let parsed = TaskSpec::parse(&content, &source).expect("fixture parses");
        let rendered = parsed.to_markdown();
        let reparsed = TaskSpec::parse(&rendered, &source).expect("rendered output parses");

        prop_assert_eq!(&reparsed.frontmatter, &parsed.frontmatter);
        prop_assert_eq!(&reparsed.title, &parsed.title);
        prop_assert_eq!(reparsed.goal.trim(), parsed.goal.trim());
        prop_assert_eq!(&reparsed.creates, &parsed.creates);
    }
}
