use wfaudit::{NodeState, ResolvedGraph};

pub trait OutputFormatter {
    fn write_report(
        &self,
        graph: &ResolvedGraph,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()>;
}

pub struct TextOutput {
    pub show_clean: bool,
}

impl OutputFormatter for TextOutput {
    fn write_report(
        &self,
        graph: &ResolvedGraph,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        for node in graph.nodes() {
            let clean = node.issues.is_empty() && node.state != NodeState::Failed;
            if clean && !self.show_clean {
                continue;
            }

            if node.state == NodeState::Failed {
                writeln!(writer, "{} [unresolved]", node.label)?;
            } else {
                writeln!(writer, "{}", node.label)?;
            }

            for issue in &node.issues {
                match issue.line {
                    Some(line) => writeln!(
                        writer,
                        "  [{}] {} (line {}): {}",
                        issue.severity, issue.issue_type, line, issue.message
                    )?,
                    None => writeln!(
                        writer,
                        "  [{}] {}: {}",
                        issue.severity, issue.issue_type, issue.message
                    )?,
                }
                if !issue.recommendation.is_empty() {
                    writeln!(writer, "    -> {}", issue.recommendation)?;
                }
            }
        }

        let stats = &graph.stats;
        writeln!(
            writer,
            "\n{} nodes, {} edges, {} with findings",
            stats.node_count, stats.edge_count, stats.nodes_with_issues
        )?;
        writeln!(
            writer,
            "findings: {} critical, {} high, {} medium, {} low",
            stats.critical, stats.high, stats.medium, stats.low
        )?;
        Ok(())
    }
}

pub struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn write_report(
        &self,
        graph: &ResolvedGraph,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, graph)?;
        writeln!(writer)?;
        Ok(())
    }
}

pub fn formatter(json: bool, show_clean: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput)
    } else {
        Box::new(TextOutput { show_clean })
    }
}
