//! Lexicon-based sentiment scoring using VADER with market-specific keyword
//! boosting.
//!
//! Three flavors are produced per article: generic (plain VADER), crypto
//! (crypto jargon boost) and stock (equity jargon boost). Scores land in
//! [-1, 1]; confidence is the non-neutral share of the text in [0, 1].

use crate::domain::ports::Classifier;
use crate::domain::types::ArticleScores;
use vader_sentiment::SentimentIntensityAnalyzer;

const CRYPTO_KEYWORDS: &[(&str, f64)] = &[
    ("surge", 0.4),
    ("rally", 0.4),
    ("soar", 0.5),
    ("all-time high", 0.5),
    ("ath", 0.4),
    ("breakout", 0.3),
    ("moon", 0.4),
    ("pump", 0.3),
    ("adoption", 0.2),
    ("institutional", 0.2),
    ("halving", 0.2),
    ("etf approval", 0.5),
    ("crash", -0.5),
    ("plunge", -0.5),
    ("dump", -0.4),
    ("collapse", -0.5),
    ("lawsuit", -0.4),
    ("ban", -0.4),
    ("hack", -0.5),
    ("exploit", -0.5),
    ("stolen", -0.5),
    ("scam", -0.6),
    ("rug pull", -0.6),
    ("fraud", -0.5),
    ("sell-off", -0.4),
    ("delisting", -0.4),
];

const STOCK_KEYWORDS: &[(&str, f64)] = &[
    ("beats estimates", 0.5),
    ("record revenue", 0.4),
    ("upgrade", 0.3),
    ("buyback", 0.3),
    ("dividend increase", 0.3),
    ("guidance raised", 0.4),
    ("misses estimates", -0.5),
    ("downgrade", -0.4),
    ("layoffs", -0.4),
    ("bankruptcy", -0.6),
    ("sec probe", -0.4),
    ("guidance cut", -0.5),
    ("recession", -0.3),
];

pub struct VaderClassifier {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl VaderClassifier {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    fn keyword_boost(text_lower: &str, keywords: &[(&str, f64)]) -> f64 {
        keywords
            .iter()
            .filter(|(keyword, _)| text_lower.contains(keyword))
            .map(|(_, score)| score)
            .sum()
    }

    fn score_flavored(&self, text: &str, keywords: Option<&[(&str, f64)]>) -> (f64, f64) {
        if text.trim().is_empty() {
            return (0.0, 0.0);
        }

        let scores = self.analyzer.polarity_scores(text);
        let compound = scores.get("compound").copied().unwrap_or(0.0);
        let neutral = scores.get("neu").copied().unwrap_or(1.0);

        let boost = match keywords {
            Some(list) => Self::keyword_boost(&text.to_lowercase(), list) * 0.5,
            None => 0.0,
        };

        let score = (compound + boost).clamp(-1.0, 1.0);
        // Confidence rises with the share of opinionated tokens and with any
        // lexicon hit; a fully neutral text scores zero confidence.
        let confidence = ((1.0 - neutral) + boost.abs()).clamp(0.0, 1.0);
        (score, confidence)
    }

    /// Title carries most of the signal; content refines it.
    fn weighted(&self, title: &str, content: &str, keywords: Option<&[(&str, f64)]>) -> (f64, f64) {
        let (title_score, title_conf) = self.score_flavored(title, keywords);
        if content.trim().is_empty() {
            return (title_score, title_conf);
        }
        let (content_score, content_conf) = self.score_flavored(content, keywords);
        (
            title_score * 0.7 + content_score * 0.3,
            title_conf * 0.7 + content_conf * 0.3,
        )
    }
}

impl Default for VaderClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for VaderClassifier {
    fn score(&self, text: &str) -> (f64, f64) {
        self.score_flavored(text, Some(CRYPTO_KEYWORDS))
    }

    fn score_article(&self, title: &str, content: &str) -> ArticleScores {
        ArticleScores {
            generic: self.weighted(title, content, None),
            crypto: self.weighted(title, content, Some(CRYPTO_KEYWORDS)),
            stock: self.weighted(title, content, Some(STOCK_KEYWORDS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_crypto_headlines_score_positive() {
        let classifier = VaderClassifier::new();
        let headlines = [
            "Bitcoin surges to new all-time high as institutional adoption grows",
            "Ethereum rally continues after ETF approval",
            "Altcoins soar in massive market breakout",
        ];
        for headline in headlines {
            let (score, confidence) = classifier.score(headline);
            assert!(score > 0.0, "expected bullish for {headline:?}, got {score}");
            assert!(confidence > 0.0);
        }
    }

    #[test]
    fn bearish_crypto_headlines_score_negative() {
        let classifier = VaderClassifier::new();
        let headlines = [
            "Bitcoin crashes 20% in devastating collapse",
            "Exchange hacked, millions stolen in exploit",
            "SEC lawsuit triggers brutal sell-off",
        ];
        for headline in headlines {
            let (score, _) = classifier.score(headline);
            assert!(score < 0.0, "expected bearish for {headline:?}, got {score}");
        }
    }

    #[test]
    fn empty_text_is_neutral_with_zero_confidence() {
        let classifier = VaderClassifier::new();
        assert_eq!(classifier.score(""), (0.0, 0.0));
        assert_eq!(classifier.score("   "), (0.0, 0.0));
    }

    #[test]
    fn flavors_diverge_on_jargon() {
        let classifier = VaderClassifier::new();
        let scores =
            classifier.score_article("Token pump accelerates after halving", "Adoption grows.");
        assert!(
            scores.crypto.0 > scores.generic.0,
            "crypto boost should lift the crypto flavor: {scores:?}"
        );
    }

    #[test]
    fn scores_stay_in_range() {
        let classifier = VaderClassifier::new();
        let scores = classifier.score_article(
            "surge rally soar moon pump adoption institutional breakout ath",
            "all-time high etf approval halving",
        );
        for (score, confidence) in [scores.generic, scores.crypto, scores.stock] {
            assert!((-1.0..=1.0).contains(&score));
            assert!((0.0..=1.0).contains(&confidence));
        }
    }
}
