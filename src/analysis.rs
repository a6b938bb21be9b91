//! The built-in eight-stage strategic-analysis pipeline.
//!
//! ```text
//! problem_explorer
//!   -> [best_practices | horizon_scanning | scenario_planning]   (group "research")
//!   -> research_synthesis
//!   -> strategic_action
//!   -> high_impact
//!   -> backcasting
//! ```
//!
//! Every stage asks for the markdown convention the strict parser reads and
//! marks its expected sections as required, so `{stage.section}` lookups in
//! later prompts always resolve.

use crate::error::Result;
use crate::output_parser::ParserProfile;
use crate::pipeline::Pipeline;
use crate::prompt::MISSING;
use crate::stage::Stage;
use crate::types::PipelineInput;
use serde::{Deserialize, Serialize};

pub const PROBLEM_EXPLORER: &str = "problem_explorer";
pub const BEST_PRACTICES: &str = "best_practices";
pub const HORIZON_SCANNING: &str = "horizon_scanning";
pub const SCENARIO_PLANNING: &str = "scenario_planning";
pub const RESEARCH_SYNTHESIS: &str = "research_synthesis";
pub const STRATEGIC_ACTION: &str = "strategic_action";
pub const HIGH_IMPACT: &str = "high_impact";
pub const BACKCASTING: &str = "backcasting";

/// Parallel group of the three research stages.
pub const RESEARCH_GROUP: &str = "research";

const FORMAT_RULES: &str = "\
Format your response in markdown exactly as follows:
- Start every section with a `## Section Title` line using the section names given above.
- List entries as numbered items (`1. ...`), one per line.
- Put labeled details on the item's line as `**Label:** value`, separated by ` -- `.
Do not add any introduction or closing remarks.";

/// What the user asks the pipeline to analyse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub strategic_question: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub time_frame: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Free-form additional instructions.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl AnalysisRequest {
    pub fn new(strategic_question: impl Into<String>) -> Self {
        Self {
            strategic_question: strategic_question.into(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: &[&str]) -> Self {
        self.scope = scope.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_time_frame(mut self, time_frame: impl Into<String>) -> Self {
        self.time_frame = Some(time_frame.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

impl From<AnalysisRequest> for PipelineInput {
    fn from(req: AnalysisRequest) -> Self {
        let or_missing = |v: Option<String>| {
            v.filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| MISSING.to_string())
        };
        let scope = if req.scope.is_empty() {
            MISSING.to_string()
        } else {
            req.scope.join(", ")
        };
        PipelineInput::new(req.strategic_question)
            .with_param("scope", scope)
            .with_param("time_frame", or_missing(req.time_frame))
            .with_param("region", or_missing(req.region))
            .with_param("prompt", or_missing(req.prompt))
    }
}

fn system(role: &str, mission: &str, sections: &[(&str, &str)]) -> String {
    let focus = sections
        .iter()
        .enumerate()
        .map(|(i, (name, ask))| format!("{}. {}: {}", i + 1, name, ask))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are the {} Agent. {} Focus on:\n\n{}\n\n{}",
        role, mission, focus, FORMAT_RULES
    )
}

fn profile(sections: &[(&str, &str)], fields: &[&str], fallback: &str) -> ParserProfile {
    let names: Vec<&str> = sections.iter().map(|(name, _)| *name).collect();
    ParserProfile::new()
        .with_sections(&names)
        .with_fields(fields)
        .with_fallback_title(fallback)
        .required()
}

fn stage(
    id: &str,
    role: &str,
    mission: &str,
    sections: &[(&str, &str)],
    fields: &[&str],
    template: &str,
) -> Stage {
    Stage::new(id, system(role, mission, sections), template)
        .with_profile(profile(sections, fields, &format!("{} (unstructured)", role)))
}

/// The eight stages, in declaration order.
pub fn stages() -> Vec<Stage> {
    vec![
        problem_explorer(),
        best_practices(),
        horizon_scanning(),
        scenario_planning(),
        research_synthesis(),
        strategic_action(),
        high_impact(),
        backcasting(),
    ]
}

/// The complete strategic-analysis pipeline.
pub fn strategic_analysis() -> Result<Pipeline> {
    Pipeline::builder()
        .name("strategic_analysis")
        .stages(stages())
        .build()
}

pub fn problem_explorer() -> Stage {
    stage(
        PROBLEM_EXPLORER,
        "Problem Explorer",
        "Your mission is to analyze and deconstruct strategic challenges.",
        &[
            ("Problem Definition", "Clearly define the core problem."),
            ("Key Questions", "Identify 2-3 critical questions to address."),
            ("Information Gaps", "List 2-3 key information gaps."),
            ("Initial Hypotheses", "Formulate 1-2 initial hypotheses."),
        ],
        &["Confidence"],
        "Analyze the following strategic challenge:

Strategic Question: {subject}
Time Frame: {time_frame}
Region: {region}
Scope: {scope}
Additional Instructions: {prompt}

Provide a structured problem analysis.",
    )
}

pub fn best_practices() -> Stage {
    stage(
        BEST_PRACTICES,
        "Best Practices",
        "Your task is to find and analyze 3 to 5 real best practices for the given challenge using verified sources.",
        &[
            (
                "Best Practices",
                "One item per practice, titled by the practice, with its organization, time frame, solution, results and a real reference.",
            ),
            ("Next Practice Recommendation", "Recommend how to go beyond the current best practices."),
            ("Key Implementation Steps", "List 3-5 steps to implement the recommendation."),
            ("Success Metrics", "List 2-3 metrics to track progress."),
        ],
        &["Organization", "Time Frame", "Challenge", "Solution", "Results", "Reference"],
        "Find best practices relevant to this strategic challenge.

Strategic Question: {subject}
Region: {region}
Scope: {scope}

Problem Definition:
{problem_explorer.problem_definition}

Key Questions:
{problem_explorer.key_questions}",
    )
    .in_group(RESEARCH_GROUP)
    .depends_on(&[PROBLEM_EXPLORER])
}

pub fn horizon_scanning() -> Stage {
    stage(
        HORIZON_SCANNING,
        "Horizon Scanning",
        "Your mission is to identify key emerging trends and developments relevant to the strategic challenge.",
        &[
            ("Emerging Trends", "List 3-4 emerging trends."),
            ("Technological Developments", "List 2-3 relevant technological developments."),
            ("Market Dynamics", "Describe 2-3 shifts in market dynamics."),
            ("Potential Disruptions", "List 2-3 potential disruptions."),
        ],
        &["Impact", "Timeframe", "Likelihood"],
        "Scan the horizon for this strategic challenge.

Strategic Question: {subject}
Time Frame: {time_frame}
Region: {region}

Problem Analysis:
{problem_explorer}",
    )
    .in_group(RESEARCH_GROUP)
    .depends_on(&[PROBLEM_EXPLORER])
}

pub fn scenario_planning() -> Stage {
    stage(
        SCENARIO_PLANNING,
        "Scenario Planning",
        "Create 3-4 distinct, plausible scenarios covering different possible futures.",
        &[(
            "Scenarios",
            "One item per scenario, titled by the scenario, with its narrative, key driver and main implication.",
        )],
        &["Narrative", "Key Driver", "Main Implication", "Likelihood"],
        "Create distinct scenarios for the following strategic challenge.

Strategic Question: {subject}
Time Frame: {time_frame}
Region: {region}

Problem Context:
{problem_explorer.problem_definition}

Initial Hypotheses:
{problem_explorer.initial_hypotheses}",
    )
    .in_group(RESEARCH_GROUP)
    .depends_on(&[PROBLEM_EXPLORER])
}

pub fn research_synthesis() -> Stage {
    stage(
        RESEARCH_SYNTHESIS,
        "Research Synthesis",
        "Your mission is to integrate findings from previous analyses to identify overarching insights.",
        &[
            ("Key Insights", "List 3-4 key insights across all research."),
            ("Market Analysis", "Summarize the market situation in 2-3 points."),
            ("Strategic Implications", "List 2-3 implications for strategy."),
            ("Recommendations", "List 3-4 recommendations."),
        ],
        &["Priority", "Confidence"],
        "Synthesize the research on: {subject}

Best Practices:
{best_practices.best_practices}

Emerging Trends:
{horizon_scanning.emerging_trends}

Potential Disruptions:
{horizon_scanning.potential_disruptions}

Scenarios:
{scenario_planning.scenarios}",
    )
    .depends_on(&[BEST_PRACTICES, HORIZON_SCANNING, SCENARIO_PLANNING])
}

pub fn strategic_action() -> Stage {
    stage(
        STRATEGIC_ACTION,
        "Strategic Action",
        "Your mission is to develop a comprehensive action plan based on the research synthesis.",
        &[
            ("Short-term Actions", "List 3-4 actions for the next year."),
            ("Medium-term Actions", "List 3-4 actions for the next 1-3 years."),
            ("Long-term Actions", "List 2-3 strategic actions for 3-5 years out."),
            ("Resource Requirements", "List key financial, human and technical resources."),
            ("Risk Mitigation", "List 2-3 key risks and how to mitigate them."),
        ],
        &["Priority", "Owner", "Timeframe"],
        "Develop an action plan for: {subject}
Time Frame: {time_frame}

Key Insights:
{research_synthesis.key_insights}

Recommendations:
{research_synthesis.recommendations}

Next Practice Recommendation:
{best_practices.next_practice_recommendation}",
    )
    .depends_on(&[RESEARCH_SYNTHESIS, BEST_PRACTICES])
}

pub fn high_impact() -> Stage {
    stage(
        HIGH_IMPACT,
        "High Impact",
        "Your mission is to identify high-impact initiatives that can drive significant value.",
        &[
            ("Strategic Initiatives", "List 2-3 major initiatives that can create transformative impact."),
            ("Quick Wins", "List 2-3 immediate opportunities that can deliver value quickly."),
            ("Innovation Opportunities", "List 2-3 innovative approaches or technologies to explore."),
            ("Resource Allocation", "List key resources needed for these initiatives."),
            ("Success Metrics", "List 2-3 key metrics to measure success."),
        ],
        &["Impact", "Effort", "Priority", "Timeframe"],
        "Identify high-impact initiatives for: {subject}

Action Plan:
{strategic_action}

Success Metrics From Best Practices:
{best_practices.success_metrics}",
    )
    .depends_on(&[STRATEGIC_ACTION, BEST_PRACTICES])
}

pub fn backcasting() -> Stage {
    stage(
        BACKCASTING,
        "Backcasting",
        "Your mission is to work backwards from the desired future state to identify critical path tasks and milestones.",
        &[
            ("Critical Path Tasks", "List 3-5 tasks that must happen, earliest first."),
            ("Milestones", "List 3-4 milestones with target dates."),
            ("Dependencies", "List the key dependencies between tasks."),
            ("Timeline", "Outline the overall timeline."),
            ("Resource Requirements", "List the resources the critical path needs."),
        ],
        &["Target Date", "Owner", "Depends On"],
        "Work backwards from success on: {subject}
Time Frame: {time_frame}

Strategic Initiatives:
{high_impact.strategic_initiatives}

Quick Wins:
{high_impact.quick_wins}

Long-term Actions:
{strategic_action.long_term_actions}",
    )
    .depends_on(&[HIGH_IMPACT, STRATEGIC_ACTION])
}
