//! Built-in analysis domains.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default roster when no selection runs.
pub const DEFAULT_ROSTER: &[BuiltinDomain] = &[
    BuiltinDomain::Market,
    BuiltinDomain::Cost,
    BuiltinDomain::Risk,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinDomain {
    Market,
    Tech,
    Cost,
    Legal,
    Scalability,
    Political,
    Social,
    Environmental,
    Ethics,
    Operational,
    Strategy,
    Risk,
}

impl BuiltinDomain {
    pub const ALL: [BuiltinDomain; 12] = [
        BuiltinDomain::Market,
        BuiltinDomain::Tech,
        BuiltinDomain::Cost,
        BuiltinDomain::Legal,
        BuiltinDomain::Scalability,
        BuiltinDomain::Political,
        BuiltinDomain::Social,
        BuiltinDomain::Environmental,
        BuiltinDomain::Ethics,
        BuiltinDomain::Operational,
        BuiltinDomain::Strategy,
        BuiltinDomain::Risk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinDomain::Market => "market",
            BuiltinDomain::Tech => "tech",
            BuiltinDomain::Cost => "cost",
            BuiltinDomain::Legal => "legal",
            BuiltinDomain::Scalability => "scalability",
            BuiltinDomain::Political => "political",
            BuiltinDomain::Social => "social",
            BuiltinDomain::Environmental => "environmental",
            BuiltinDomain::Ethics => "ethics",
            BuiltinDomain::Operational => "operational",
            BuiltinDomain::Strategy => "strategy",
            BuiltinDomain::Risk => "risk",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|d| d.name() == lowered)
    }

    /// One-line description shown to the selection call.
    pub fn description(self) -> &'static str {
        match self {
            BuiltinDomain::Market => "demand, competition, customer segments and market sizing",
            BuiltinDomain::Tech => "technical feasibility, architecture and build complexity",
            BuiltinDomain::Cost => "costs, unit economics, budgets and financial exposure",
            BuiltinDomain::Legal => "regulation, compliance, contracts and liability",
            BuiltinDomain::Scalability => "growth limits, capacity and operational scaling",
            BuiltinDomain::Political => "policy, government relations and geopolitical exposure",
            BuiltinDomain::Social => "public perception, communities and workforce impact",
            BuiltinDomain::Environmental => "environmental footprint, sustainability and climate risk",
            BuiltinDomain::Ethics => "ethical implications, fairness and stakeholder harm",
            BuiltinDomain::Operational => "execution, processes, supply chain and staffing",
            BuiltinDomain::Strategy => "strategic fit, positioning and long-term options",
            BuiltinDomain::Risk => "downside scenarios, likelihood, impact and mitigations",
        }
    }

    pub fn system_prompt(self) -> String {
        let focus = match self {
            BuiltinDomain::Market => {
                "Assess market demand, competitors, customer segments, pricing power and market size. \
Distinguish evidence from assumption."
            }
            BuiltinDomain::Tech => {
                "Assess technical feasibility, required capabilities, architecture choices, build-vs-buy \
and delivery risk."
            }
            BuiltinDomain::Cost => {
                "Assess upfront and running costs, unit economics, break-even and cash exposure. \
State the cost drivers explicitly."
            }
            BuiltinDomain::Legal => {
                "Assess regulatory requirements, licensing, contractual exposure, liability and \
jurisdictional constraints."
            }
            BuiltinDomain::Scalability => {
                "Assess how the plan behaves under growth: capacity limits, bottlenecks, marginal \
costs and operational load."
            }
            BuiltinDomain::Political => {
                "Assess policy direction, government stance, subsidies, sanctions and geopolitical \
exposure."
            }
            BuiltinDomain::Social => {
                "Assess public perception, community impact, workforce effects and cultural fit."
            }
            BuiltinDomain::Environmental => {
                "Assess environmental footprint, sustainability obligations and exposure to climate \
and resource risk."
            }
            BuiltinDomain::Ethics => {
                "Assess ethical implications, fairness, consent and potential harm to stakeholders."
            }
            BuiltinDomain::Operational => {
                "Assess execution: processes, supply chain, staffing, vendors and day-to-day \
operational risk."
            }
            BuiltinDomain::Strategy => {
                "Assess strategic fit, competitive positioning, optionality and long-term \
consequences."
            }
            BuiltinDomain::Risk => {
                "Identify downside scenarios, estimate likelihood and impact, and propose concrete \
mitigations."
            }
        };
        format!(
            "You are the {} analyst on a multi-domain decision panel. {} \
Be specific and flag critical issues with red:, concerns with yellow: and positives with green:.",
            self.name(),
            focus
        )
    }

    /// (name, description) pairs for the selection prompt.
    pub fn catalogue() -> Vec<(&'static str, &'static str)> {
        Self::ALL
            .into_iter()
            .map(|d| (d.name(), d.description()))
            .collect()
    }
}

impl fmt::Display for BuiltinDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_round_trips() {
        for domain in BuiltinDomain::ALL {
            assert_eq!(BuiltinDomain::from_name(domain.name()), Some(domain));
        }
        assert_eq!(BuiltinDomain::from_name(" Market "), Some(BuiltinDomain::Market));
        assert_eq!(BuiltinDomain::from_name("astrology"), None);
    }

    #[test]
    fn test_system_prompt_names_domain() {
        let prompt = BuiltinDomain::Legal.system_prompt();
        assert!(prompt.contains("legal analyst"));
        assert!(prompt.contains("red:"));
    }

    #[test]
    fn test_catalogue_covers_all_domains() {
        assert_eq!(BuiltinDomain::catalogue().len(), 12);
        assert_eq!(DEFAULT_ROSTER.len(), 3);
    }
}
