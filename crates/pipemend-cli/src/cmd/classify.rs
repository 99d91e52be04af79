use crate::output::{print_json, print_table};
use pipemend_core::{classifier, escalation, strategy};

pub fn run(step: &str, text: &str, json: bool) -> anyhow::Result<()> {
    let classification = classifier::classify(step, text);
    let cause = classifier::root_cause(step, classification.category);
    // No workflow in hand, so wrapper patches count as possible.
    let ctx = strategy::MatchContext::new(step, text, "", classification.category, "");
    let choice = strategy::select(&ctx);

    if json {
        let value = serde_json::json!({
            "category": classification.category,
            "confidence": classification.confidence,
            "root_cause": cause,
            "strategy": choice.strategy,
            "strategy_confidence": choice.confidence,
        });
        return print_json(&value);
    }

    print_table(
        &["FIELD", "VALUE"],
        vec![
            vec!["category".to_string(), classification.category.to_string()],
            vec![
                "confidence".to_string(),
                format!("{:.2}", classification.confidence),
            ],
            vec!["root cause".to_string(), cause.to_string()],
            vec![
                "strategy".to_string(),
                format!("{} ({:.2})", choice.strategy.as_str(), choice.confidence),
            ],
        ],
    );
    println!("\n{}", escalation::explanation(classification.category));
    Ok(())
}
