use crate::domain::market::Holding;
use crate::domain::recommendation::Constraints;
use crate::market::MarketSnapshot;
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// A fully rendered reasoning request plus the canonical ticker universe the
/// output validator will enforce. Construction is pure: identical inputs
/// produce byte-identical text, and the as-of date is a parameter, never a
/// clock read.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub text: String,
    pub universe: BTreeSet<String>,
}

impl PromptRequest {
    pub fn build(
        holdings: &[Holding],
        snapshot: &MarketSnapshot,
        constraints: &Constraints,
        as_of_date: NaiveDate,
    ) -> Self {
        let universe = snapshot.tickers();

        let holdings_json = serde_json::to_string(
            &holdings
                .iter()
                .map(|h| {
                    serde_json::json!({
                        "ticker": h.ticker,
                        "shares": h.shares,
                        "costBasis": h.cost_basis,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        let snapshot_json = serde_json::to_string(
            &snapshot
                .entries
                .iter()
                .map(|e| match &e.quality {
                    Some(q) => serde_json::json!({
                        "ticker": e.ticker,
                        "price": e.price,
                        "dividendYield": e.dividend_yield,
                        "qualityScore": q.quality_score,
                        "leverageFlag": q.leverage_flag,
                        "yieldTrapFlag": q.yield_trap_flag,
                        "dividendCutFlag": q.dividend_cut_flag,
                    }),
                    None => serde_json::json!({
                        "ticker": e.ticker,
                        "price": e.price,
                        "dataGap": true,
                    }),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        let universe_csv = universe.iter().cloned().collect::<Vec<_>>().join(", ");

        let text = [
            "You are a dividend-portfolio advisor. Propose a rebalanced target portfolio.".to_string(),
            String::new(),
            "Respond with ONLY a single JSON object matching this exact schema:".to_string(),
            "{".to_string(),
            "  \"targetPortfolio\": [".to_string(),
            "    {\"ticker\": \"MSFT\", \"weight\": 0.05, \"rationale\": \"one short sentence\"}".to_string(),
            "  ],".to_string(),
            "  \"explanation\": {".to_string(),
            "    \"summary\": \"string\",".to_string(),
            "    \"bullets\": [\"string\"],".to_string(),
            "    \"risksToWatch\": [\"string\"]".to_string(),
            "  }".to_string(),
            "}".to_string(),
            "Field types: ticker=string, weight=number in [0,1], rationale=string.".to_string(),
            "Rules:".to_string(),
            format!("- Use ONLY tickers from this universe: [{universe_csv}]. Never introduce any other ticker."),
            "- weights must sum to exactly 1.0".to_string(),
            format!("- at most {} positions", constraints.max_holdings),
            format!(
                "- prefer payout ratios <= {} and debt-to-equity <= {}; treat yieldTrapFlag/leverageFlag/dividendCutFlag as warnings",
                constraints.payout_ceiling, constraints.leverage_ceiling
            ),
            "- entries marked dataGap have no fundamental data; weigh them cautiously or explain their exclusion".to_string(),
            "- no markdown fences, no prose outside the JSON object".to_string(),
            String::new(),
            format!("As-of date: {as_of_date}"),
            format!("Benchmark: {}", constraints.benchmark_ticker),
            format!("Current holdings JSON:\n{holdings_json}"),
            format!("Market snapshot JSON:\n{snapshot_json}"),
        ]
        .join("\n");

        Self { text, universe }
    }
}
