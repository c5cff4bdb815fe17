//! Maps the free-text certificate result returned by the provider to a verdict.
//!
//! Matching is a case-insensitive substring test over the primary text (`situacao`,
//! `certidao`, or `mensagem`) and the secondary text (`emitida_as`). Rules run in a fixed
//! order and later rules override earlier ones. Anything that matches no rule is
//! irregular: an unreadable answer must never be reported as compliant.

use super::domain::Verdict;

/// Phrases that indicate a clean record: "negative certificate", "no debts on file",
/// "no pending items", "in force", "regular".
const REGULAR_KEYWORDS: [&str; 5] = [
    "negativa",
    "não constam",
    "sem pendências",
    "em vigor",
    "regular",
];

const POSITIVE: &str = "positiva";
const NEGATIVE_EFFECTS: &str = "efeitos de negativa";
const IRREGULAR: &str = "irregular";

pub struct StatusClassifier;

impl StatusClassifier {
    pub fn classify(primary: &str, secondary: &str) -> Verdict {
        let primary = primary.to_lowercase();
        let secondary = secondary.to_lowercase();
        let either = |needle: &str| primary.contains(needle) || secondary.contains(needle);

        let mut regular = REGULAR_KEYWORDS.iter().any(|keyword| either(*keyword));

        // "Positive certificate with the effects of a negative one" is a compliant form.
        let positive_with_negative_effects =
            primary.contains(POSITIVE) && primary.contains(NEGATIVE_EFFECTS);
        if positive_with_negative_effects {
            regular = true;
        }

        // "irregular" also matched the "regular" keyword above.
        if either(IRREGULAR) {
            regular = false;
        }

        // A plain positive certificate means outstanding debt.
        if either(POSITIVE) && !positive_with_negative_effects {
            regular = false;
        }

        if regular {
            Verdict::Regular
        } else {
            Verdict::Irregular
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(primary: &str) -> Verdict {
        StatusClassifier::classify(primary, "")
    }

    #[test]
    fn empty_text_is_irregular() {
        assert_eq!(classify(""), Verdict::Irregular);
        assert_eq!(StatusClassifier::classify("", ""), Verdict::Irregular);
    }

    #[test]
    fn irregular_is_not_matched_as_regular() {
        assert_eq!(classify("Irregular"), Verdict::Irregular);
        assert_eq!(classify("SITUAÇÃO IRREGULAR"), Verdict::Irregular);
    }

    #[test]
    fn negative_certificates_are_regular() {
        assert_eq!(classify("Certidão Negativa de Débitos"), Verdict::Regular);
        assert_eq!(classify("CERTIDÃO NEGATIVA DE DÉBITOS"), Verdict::Regular);
        assert_eq!(classify("Certidão Negativa"), Verdict::Regular);
    }

    #[test]
    fn positive_with_negative_effects_is_regular() {
        assert_eq!(
            classify("Certidão Positiva com Efeitos de Negativa"),
            Verdict::Regular
        );
        assert_eq!(
            classify("CERTIDÃO POSITIVA COM EFEITOS DE NEGATIVA"),
            Verdict::Regular
        );
    }

    #[test]
    fn plain_positive_certificate_is_irregular() {
        assert_eq!(classify("Certidão Positiva"), Verdict::Irregular);
        assert_eq!(
            StatusClassifier::classify("Certidão Negativa", "positiva"),
            Verdict::Irregular
        );
    }

    #[test]
    fn regularity_phrases_are_regular() {
        assert_eq!(classify("Regular"), Verdict::Regular);
        assert_eq!(classify("Não constam débitos"), Verdict::Regular);
        assert_eq!(classify("NÃO CONSTAM pendências"), Verdict::Regular);
        assert_eq!(classify("Sem pendências"), Verdict::Regular);
        assert_eq!(classify("Certificado em Vigor"), Verdict::Regular);
    }

    #[test]
    fn unrecognized_text_is_irregular() {
        assert_eq!(classify("Com Pendências"), Verdict::Irregular);
        assert_eq!(classify("Não Cadastrado"), Verdict::Irregular);
        assert_eq!(classify("Constam débitos relativos a tributos"), Verdict::Irregular);
    }

    #[test]
    fn secondary_text_contributes_keywords() {
        assert_eq!(
            StatusClassifier::classify("Consulta realizada", "Certidão Negativa"),
            Verdict::Regular
        );
        assert_eq!(
            StatusClassifier::classify("Regular", "emitida como irregular"),
            Verdict::Irregular
        );
    }

    #[test]
    fn negative_effects_only_rescue_the_primary_text() {
        assert_eq!(
            StatusClassifier::classify(
                "Consulta realizada",
                "Certidão Positiva com Efeitos de Negativa"
            ),
            Verdict::Irregular
        );
    }

    #[test]
    fn irregular_overrides_negative_effects() {
        assert_eq!(
            classify("Certidão Positiva com Efeitos de Negativa - situação irregular"),
            Verdict::Irregular
        );
    }
}
