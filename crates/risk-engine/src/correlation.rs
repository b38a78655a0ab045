/// Static pairwise correlation table for the symbols the engine trades.
/// Values are long-run estimates; unknown pairs default to uncorrelated.
const CORRELATIONS: &[(&str, &str, f64)] = &[
    ("EURUSD", "GBPUSD", 0.85),
    ("EURUSD", "USDCHF", -0.92),
    ("EURUSD", "AUDUSD", 0.65),
    ("EURUSD", "USDJPY", -0.30),
    ("EURUSD", "EURJPY", 0.45),
    ("GBPUSD", "USDCHF", -0.80),
    ("GBPUSD", "EURJPY", 0.40),
    ("AUDUSD", "NZDUSD", 0.87),
    ("AUDUSD", "USDCAD", -0.75),
    ("NZDUSD", "USDCAD", -0.68),
    ("USDCHF", "USDJPY", 0.55),
    ("USDJPY", "EURJPY", 0.72),
    ("XAUUSD", "XAGUSD", 0.80),
    ("XAUUSD", "USDCHF", -0.40),
];

/// Correlation between two symbols. Symmetric; 1.0 for the same symbol,
/// 0.0 for pairs not in the table.
pub fn pair_correlation(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    for (x, y, corr) in CORRELATIONS {
        if (*x == a && *y == b) || (*x == b && *y == a) {
            return *corr;
        }
    }
    0.0
}
