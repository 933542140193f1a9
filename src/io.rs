//! Graph documents and format dispatch
//!
//! Readers turn a file into a [`GraphDocument`]; writers render any
//! [`Document`] (a graph, cluster labels or a whole hierarchy). The
//! [`FormatRegistry`] picks an implementation from a file extension or a
//! format id.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::hierarchy::{ClusteringMethod, GraphLevel};
use crate::model::{Edge, EdgeKey, Graph, Node};

/// Nodes and edges as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDocument {
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            nodes: graph.nodes().to_vec(),
            edges: graph.edges().to_vec(),
        }
    }

    /// Validate into a [`Graph`]; degrees are recomputed from the edges
    pub fn into_graph(mut self) -> Result<Graph> {
        for edge in self.edges.iter_mut().filter(|e| e.id.is_empty()) {
            edge.id = format!("{}-{}", edge.from, edge.to);
        }
        let mut graph = Graph::from_parts(self.nodes, self.edges)?;
        graph.recompute_degrees();
        Ok(graph)
    }
}

/// Cluster label of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub id: String,
    pub cluster: Option<usize>,
}

/// Output of a single clustering pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub clustering: ClusteringMethod,
    pub cluster_count: usize,
    /// Only reported for Louvain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modularity: Option<f64>,
    pub clusters: Vec<ClusterAssignment>,
}

/// One aggregated edge and the finer edges behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMappingEntry {
    pub edge: EdgeKey,
    pub subsumes: Vec<EdgeKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelDocument {
    pub index: usize,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_mapping: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_mapping: Vec<EdgeMappingEntry>,
}

impl From<&GraphLevel> for LevelDocument {
    fn from(level: &GraphLevel) -> Self {
        Self {
            index: level.index(),
            nodes: level.graph().nodes().to_vec(),
            edges: level.graph().edges().to_vec(),
            node_mapping: level.node_mapping().clone(),
            edge_mapping: level
                .edge_mapping()
                .iter()
                .map(|(edge, subsumed)| EdgeMappingEntry {
                    edge: edge.clone(),
                    subsumes: subsumed.iter().map(Edge::key).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyDocument {
    pub levels: Vec<LevelDocument>,
}

impl HierarchyDocument {
    pub fn from_levels(levels: &[GraphLevel]) -> Self {
        Self {
            levels: levels.iter().map(LevelDocument::from).collect(),
        }
    }
}

/// Anything a writer can render
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Document {
    Graph(GraphDocument),
    Clusters(ClusterDocument),
    Hierarchy(HierarchyDocument),
}

/// A reader parses an input file into a graph document
pub trait Reader {
    fn read(&self, input: &Path) -> Result<GraphDocument>;

    /// File extensions this reader can handle (e.g., ["yaml", "yml"])
    fn supported_extensions(&self) -> &[&str];

    /// Check if this reader can handle the given file extension
    fn supports_extension(&self, ext: &str) -> bool {
        self.supported_extensions()
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// A writer renders documents in one output format
pub trait Writer {
    fn render(&self, document: &Document) -> Result<String>;

    /// Identifier for this output format (e.g., "json", "yaml")
    fn format_id(&self) -> &str;

    /// File extensions that select this writer
    fn supported_extensions(&self) -> &[&str];

    /// Render and write to `output`, followed by a newline
    fn write(&self, document: &Document, output: &Path) -> Result<()> {
        let mut rendered = self.render(document)?;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        fs::write(output, rendered)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct JsonReader;

impl JsonReader {
    pub fn new() -> Self {
        Self
    }
}

impl Reader for JsonReader {
    fn read(&self, input: &Path) -> Result<GraphDocument> {
        let content = fs::read_to_string(input)?;
        serde_json::from_str(&content)
            .map_err(|e| GraphError::Parse(format!("{}: {e}", input.display())))
    }

    fn supported_extensions(&self) -> &[&str] {
        &["json"]
    }
}

#[derive(Debug, Default)]
pub struct YamlReader;

impl YamlReader {
    pub fn new() -> Self {
        Self
    }
}

impl Reader for YamlReader {
    fn read(&self, input: &Path) -> Result<GraphDocument> {
        let content = fs::read_to_string(input)?;
        serde_yaml::from_str(&content)
            .map_err(|e| GraphError::Parse(format!("{}: {e}", input.display())))
    }

    fn supported_extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }
}

/// Pretty-printed JSON
#[derive(Debug, Default)]
pub struct JsonWriter;

impl JsonWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Writer for JsonWriter {
    fn render(&self, document: &Document) -> Result<String> {
        serde_json::to_string_pretty(document).map_err(|e| GraphError::Parse(e.to_string()))
    }

    fn format_id(&self) -> &str {
        "json"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["json"]
    }
}

#[derive(Debug, Default)]
pub struct YamlWriter;

impl YamlWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Writer for YamlWriter {
    fn render(&self, document: &Document) -> Result<String> {
        serde_yaml::to_string(document).map_err(|e| GraphError::Parse(e.to_string()))
    }

    fn format_id(&self) -> &str {
        "yaml"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }
}

/// Registry of available readers and writers
pub struct FormatRegistry {
    readers: Vec<Box<dyn Reader>>,
    writers: Vec<Box<dyn Writer>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }

    /// Registry with the JSON and YAML readers and writers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_reader(Box::new(JsonReader::new()));
        registry.register_reader(Box::new(YamlReader::new()));
        registry.register_writer(Box::new(JsonWriter::new()));
        registry.register_writer(Box::new(YamlWriter::new()));
        registry
    }

    pub fn register_reader(&mut self, reader: Box<dyn Reader>) {
        self.readers.push(reader);
    }

    pub fn register_writer(&mut self, writer: Box<dyn Writer>) {
        self.writers.push(writer);
    }

    pub fn reader_for_extension(&self, ext: &str) -> Option<&dyn Reader> {
        self.readers
            .iter()
            .find(|r| r.supports_extension(ext))
            .map(|r| r.as_ref())
    }

    /// Find a writer by format ID (case insensitive)
    pub fn writer_for_format(&self, format_id: &str) -> Option<&dyn Writer> {
        self.writers
            .iter()
            .find(|w| w.format_id().eq_ignore_ascii_case(format_id))
            .map(|w| w.as_ref())
    }

    pub fn extension_from_path(path: &Path) -> Option<&str> {
        path.extension().and_then(|e| e.to_str())
    }

    /// Find a reader for the given path based on its extension
    pub fn reader_for_path(&self, path: &Path) -> Result<&dyn Reader> {
        let ext = Self::extension_from_path(path)
            .ok_or_else(|| GraphError::UnknownExtension(path.display().to_string()))?;

        self.reader_for_extension(ext)
            .ok_or_else(|| GraphError::UnsupportedFormat(ext.to_string()))
    }

    /// Find a writer for the given path based on its extension
    pub fn writer_for_path(&self, path: &Path) -> Result<&dyn Writer> {
        let ext = Self::extension_from_path(path)
            .ok_or_else(|| GraphError::UnknownExtension(path.display().to_string()))?;

        self.writers
            .iter()
            .find(|w| {
                w.supported_extensions()
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            })
            .map(|w| w.as_ref())
            .ok_or_else(|| GraphError::UnsupportedFormat(ext.to_string()))
    }

    /// Read and validate the graph stored at `path`
    pub fn read_graph(&self, path: &Path) -> Result<Graph> {
        self.reader_for_path(path)?.read(path)?.into_graph()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyBuilder;
    use glam::DVec3;
    use std::io::Write as _;
    use std::path::PathBuf;

    struct MockReader {
        extensions: Vec<&'static str>,
    }

    impl Reader for MockReader {
        fn read(&self, _input: &Path) -> Result<GraphDocument> {
            Ok(GraphDocument {
                nodes: vec![Node::new("mock", DVec3::ZERO)],
                edges: Vec::new(),
            })
        }

        fn supported_extensions(&self) -> &[&str] {
            &self.extensions
        }
    }

    struct MockWriter {
        format: &'static str,
    }

    impl Writer for MockWriter {
        fn render(&self, _document: &Document) -> Result<String> {
            Ok(String::new())
        }

        fn format_id(&self) -> &str {
            self.format
        }

        fn supported_extensions(&self) -> &[&str] {
            &["mock"]
        }
    }

    fn temp_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    // ========== Registry Tests ==========

    #[test]
    fn reader_supports_extension_case_insensitive() {
        let reader = MockReader {
            extensions: vec!["json"],
        };
        assert!(reader.supports_extension("json"));
        assert!(reader.supports_extension("JSON"));
        assert!(!reader.supports_extension("yaml"));
    }

    #[test]
    fn registry_finds_mock_reader_and_writer() {
        let mut registry = FormatRegistry::new();
        registry.register_reader(Box::new(MockReader {
            extensions: vec!["graph"],
        }));
        registry.register_writer(Box::new(MockWriter { format: "mock" }));

        let doc = registry
            .reader_for_path(Path::new("input.graph"))
            .unwrap()
            .read(Path::new("input.graph"))
            .unwrap();
        assert_eq!(doc.nodes[0].id, "mock");
        assert!(registry.writer_for_format("MOCK").is_some());
        assert!(registry.writer_for_path(Path::new("out.mock")).is_ok());
    }

    #[test]
    fn registry_reports_unknown_formats() {
        let registry = FormatRegistry::with_defaults();
        assert!(matches!(
            registry.reader_for_path(&PathBuf::from("graph.xyz")),
            Err(GraphError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            registry.reader_for_path(&PathBuf::from("noextension")),
            Err(GraphError::UnknownExtension(_))
        ));
        assert!(registry.writer_for_format("html").is_none());
    }

    #[test]
    fn with_defaults_registers_json_and_yaml() {
        let registry = FormatRegistry::with_defaults();
        for ext in ["json", "yaml", "yml", "YML"] {
            assert!(registry.reader_for_extension(ext).is_some(), "{ext}");
        }
        assert_eq!(
            registry
                .writer_for_path(Path::new("out.yml"))
                .unwrap()
                .format_id(),
            "yaml"
        );
        assert_eq!(
            registry.writer_for_format("json").unwrap().format_id(),
            "json"
        );
    }

    // ========== Reader Tests ==========

    #[test]
    fn json_reader_builds_graph_with_degrees() {
        let file = temp_file(
            ".json",
            r#"{
                "nodes": [
                    {"id": "a", "position": [0.0, 0.0, 0.0]},
                    {"id": "b", "position": [1.0, 0.0, 0.0]}
                ],
                "edges": [{"from": "a", "to": "b", "weight": 2.0}]
            }"#,
        );
        let graph = FormatRegistry::with_defaults()
            .read_graph(file.path())
            .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges()[0].weight, 2.0);
        assert_eq!(graph.edges()[0].id, "a-b");
        assert_eq!(graph.node("a").unwrap().degree, 1);
    }

    #[test]
    fn yaml_reader_accepts_minimal_documents() {
        let file = temp_file(
            ".yaml",
            "nodes:\n  - id: a\n  - id: b\n    position: [3.0, 4.0, 0.0]\nedges:\n  - from: a\n    to: b\n",
        );
        let graph = FormatRegistry::with_defaults()
            .read_graph(file.path())
            .unwrap();
        assert_eq!(graph.node("a").unwrap().position, DVec3::ZERO);
        assert_eq!(
            graph.node("b").unwrap().position,
            DVec3::new(3.0, 4.0, 0.0)
        );
    }

    #[test]
    fn dangling_edges_fail_validation() {
        let file = temp_file(
            ".json",
            r#"{"nodes": [{"id": "a"}], "edges": [{"from": "a", "to": "missing"}]}"#,
        );
        assert!(matches!(
            FormatRegistry::with_defaults().read_graph(file.path()),
            Err(GraphError::InvalidInput(_))
        ));
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        let file = temp_file(".yaml", "nodes: [unclosed\n");
        assert!(matches!(
            FormatRegistry::with_defaults().read_graph(file.path()),
            Err(GraphError::Parse(_))
        ));
    }

    // ========== Writer Tests ==========

    #[test]
    fn json_writer_renders_cluster_documents() {
        let document = Document::Clusters(ClusterDocument {
            clustering: ClusteringMethod::Louvain,
            cluster_count: 1,
            modularity: None,
            clusters: vec![
                ClusterAssignment {
                    id: "a".to_string(),
                    cluster: Some(0),
                },
                ClusterAssignment {
                    id: "b".to_string(),
                    cluster: None,
                },
            ],
        });
        insta::assert_snapshot!(JsonWriter::new().render(&document).unwrap(), @r#"
        {
          "clustering": {
            "method": "louvain"
          },
          "cluster_count": 1,
          "clusters": [
            {
              "id": "a",
              "cluster": 0
            },
            {
              "id": "b",
              "cluster": null
            }
          ]
        }
        "#);
    }

    #[test]
    fn yaml_writer_output_reads_back() {
        let graph = Graph::from_parts(
            vec![
                Node::new("a", DVec3::new(1.0, 2.0, 3.0)),
                Node::new("b", DVec3::ZERO),
            ],
            vec![Edge::new("a", "b").with_weight(0.5)],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("graph.yaml");
        YamlWriter::new()
            .write(&Document::Graph(GraphDocument::from_graph(&graph)), &out)
            .unwrap();

        let back = FormatRegistry::with_defaults().read_graph(&out).unwrap();
        assert_eq!(back.node("a").unwrap().position, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(back.edges()[0].weight, 0.5);
    }

    #[test]
    fn hierarchy_document_lists_edge_mappings() {
        let graph = Graph::from_parts(
            vec![
                Node::new("a", DVec3::ZERO),
                Node::new("b", DVec3::X),
                Node::new("c", DVec3::Y),
                Node::new("d", DVec3::ONE),
            ],
            vec![Edge::new("a", "b"), Edge::new("c", "d"), Edge::new("b", "c")],
        )
        .unwrap();
        let levels = HierarchyBuilder::default().build(graph).unwrap();
        let document = HierarchyDocument::from_levels(&levels);

        assert_eq!(document.levels.len(), levels.len());
        assert!(document.levels[0].node_mapping.is_empty());
        let level1 = &document.levels[1];
        assert_eq!(level1.index, 1);
        for entry in &level1.edge_mapping {
            assert!(!entry.subsumes.is_empty());
        }

        let json = JsonWriter::new()
            .render(&Document::Hierarchy(document))
            .unwrap();
        assert!(json.contains("\"levels\""));
    }
}
