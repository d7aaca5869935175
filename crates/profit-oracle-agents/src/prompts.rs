//! Prompt text for every role. Kept in one place so wording changes stay reviewable.

use profit_oracle_core::{DatasetSummary, IMPACT_LINE_PREFIX, SynthesisInput, TaskPackage};

pub const MANAGER_ROLE: &str = "You lead a small business-consulting team. One specialist researches \
industry standards and practices; the other analyzes client data to surface insights. \
Give each of them a package with the tasks to complete, the focus to keep while working, \
and the standard that marks the work as done. Base the packages on the client's business \
and goal so the team returns actionable insights. Keep every instruction short and concrete.";

pub const SIMPLIFIER_ROLE: &str = "You rewrite task prompts for a deep-research model. The prompt \
below was rejected because the work it implies exceeded the model's processing limits. \
Narrow the scope so the task needs less searching and reasoning, but keep its intent and \
its quality bar. Reply with the rewritten prompt only, without commentary.";

pub const ANALYTICS_ROLE: &str = "You are a data analyst working inside a Python sandbox with the \
client's dataset attached.";

pub const SYNTHESIZER_ROLE: &str = "You are a business advisor writing the final client report.";

pub fn manager_request(profile: &str, goal: &str, summary: &DatasetSummary) -> String {
    format!(
        "Client business profile: {profile}\n\
         Client goal: {goal}\n\
         The client uploaded a table ({}). Structure:\n{}",
        summary.path.display(),
        summary.render()
    )
}

/// Research prompt built from the tasks and focus only.
pub fn research_prompt(package: &TaskPackage) -> String {
    format!(
        "Your task: {}\nKeep this focus while working on it: {}",
        package.tasks, package.focus
    )
}

pub fn simplification_request(previous_prompt: &str) -> String {
    format!("Prompt to simplify:\n{previous_prompt}")
}

pub fn analytics_prompt(package: &TaskPackage) -> String {
    format!(
        "Your tasks: {}\nKeep this focus while working on them: {}\n\n\
         If you draw any chart, never call plt.show(). Save it with plt.savefig() \
         and return the saved image as an output file.",
        package.tasks, package.focus
    )
}

pub fn synthesis_prompt(input: &SynthesisInput, with_chart: bool) -> String {
    let mut prompt = format!(
        "Client business profile: {}\n\
         Engagement goal: {}\n\n\
         Research specialist report:\n{}\n\n---\n\n\
         Analytics specialist report (based on the client's own data):\n{}\n",
        input.business_profile, input.goal, input.research_report, input.analytics_report
    );
    if with_chart {
        prompt.push_str("\nThe analytics specialist also produced the attached chart.\n");
    }
    prompt.push_str(&format!(
        "\nCombine all of this into one report of actionable insights that helps the client reach \
         the goal, with concrete action items. Output only the report body, ready to print: no \
         preamble, no follow-up questions, no extra suggestions. Close with a single line of the \
         form \"{IMPACT_LINE_PREFIX} $<amount>\" giving your best estimate in US dollars."
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package() -> TaskPackage {
        TaskPackage::new("Benchmark pricing", "Rural stores", "Five comparable stores")
    }

    #[test]
    fn research_prompt_leaves_out_the_standard() {
        let prompt = research_prompt(&package());
        assert!(prompt.contains("Benchmark pricing"));
        assert!(prompt.contains("Rural stores"));
        assert!(!prompt.contains("Five comparable stores"));
    }

    #[test]
    fn analytics_prompt_demands_saved_charts() {
        let prompt = analytics_prompt(&package());
        assert!(prompt.contains("plt.savefig()"));
        assert!(prompt.contains("never call plt.show()"));
    }

    #[test]
    fn synthesis_prompt_mentions_chart_only_when_present() {
        let input = SynthesisInput {
            business_profile: "A medium general store".into(),
            goal: "Increase revenue".into(),
            research_report: "R".into(),
            analytics_report: "A".into(),
            graph_file_path: None,
        };
        assert!(!synthesis_prompt(&input, false).contains("attached chart"));
        let with_chart = synthesis_prompt(&input, true);
        assert!(with_chart.contains("attached chart"));
        assert!(with_chart.contains(IMPACT_LINE_PREFIX));
    }
}
