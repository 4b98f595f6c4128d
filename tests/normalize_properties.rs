//! Property tests for CA bundle normalization
//!
//! Run with: cargo test --test normalize_properties

use pg_trustpool::tls::normalize;
use proptest::prelude::*;

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

/// A well-formed certificate block with a random base64-looking body
fn cert_block() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Za-z0-9+/]{4,64}", 1..4)
        .prop_map(|lines| format!("{}\n{}\n{}", BEGIN, lines.join("\n"), END))
}

/// Text between blocks that cannot contain a marker
fn filler() -> impl Strategy<Value = String> {
    "[ a-z0-9\\n\\r#:.]{0,40}"
}

fn bundle() -> impl Strategy<Value = (Vec<String>, String)> {
    (
        prop::collection::vec((filler(), cert_block()), 0..6),
        filler(),
        any::<bool>(),
    )
        .prop_map(|(parts, tail, crlf)| {
            let blocks: Vec<String> = parts.iter().map(|(_, block)| block.clone()).collect();
            let mut text: String = parts
                .into_iter()
                .map(|(gap, block)| format!("{}{}", gap, block))
                .collect();
            text.push_str(&tail);
            if crlf {
                text = text.replace("\r\n", "\n").replace('\n', "\r\n");
            }
            (blocks, text)
        })
}

proptest! {
    #[test]
    fn prop_count_and_order_preserved((blocks, text) in bundle()) {
        let certs = normalize(Some(&text));
        prop_assert_eq!(certs.len(), blocks.len());
        for (cert, block) in certs.iter().zip(&blocks) {
            prop_assert_eq!(cert, &format!("{}\n", block));
        }
    }

    #[test]
    fn prop_entries_are_clean((_, text) in bundle()) {
        for cert in normalize(Some(&text)) {
            prop_assert!(cert.starts_with(BEGIN));
            let end_line = format!("{}\n", END);
            prop_assert!(cert.ends_with(&end_line));
            prop_assert!(!cert.contains('\r'));
            prop_assert!(!cert.ends_with("\n\n"));
        }
    }

    #[test]
    fn prop_idempotent((_, text) in bundle()) {
        let once = normalize(Some(&text));
        let twice = normalize(Some(&once.concat()));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_never_panics(text in "\\PC{0,200}") {
        let _ = normalize(Some(&text));
    }

    #[test]
    fn prop_unterminated_tail_ignored((blocks, text) in bundle(), body in "[A-Za-z0-9]{0,20}") {
        let truncated = format!("{}{}\n{}", text, BEGIN, body);
        prop_assert_eq!(normalize(Some(&truncated)).len(), blocks.len());
    }
}
