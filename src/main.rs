use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use graph_viser::config::EngineConfig;
use graph_viser::dbscan::{cluster_count, dbscan_graph};
use graph_viser::hierarchy::{ClusteringMethod, HierarchyBuilder};
use graph_viser::io::{
    ClusterAssignment, ClusterDocument, Document, FormatRegistry, GraphDocument, HierarchyDocument,
};
use graph_viser::layout::NodeLayouter;
use graph_viser::louvain::louvain_graph;
use graph_viser::model::{Area, Graph};

/// Force-directed layout and hierarchical clustering for node/edge graphs.
#[derive(Parser)]
#[command(name = "graph-viser")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (.yaml, .yml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

/// Input and output shared by every subcommand
#[derive(Args, Debug)]
struct IoArgs {
    /// Input graph document (.json, .yaml or .yml)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file; printed to stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format; defaults to the output extension, or json
    #[arg(short, long)]
    format: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    Louvain,
    Dbscan,
}

/// Clustering overrides
#[derive(Args, Debug)]
struct ClusterArgs {
    /// Clustering method
    #[arg(short, long, value_enum)]
    method: Option<Method>,

    /// DBSCAN neighborhood radius
    #[arg(long)]
    epsilon: Option<f64>,

    /// DBSCAN density threshold
    #[arg(long)]
    min_pts: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the force-directed layout and write the moved graph
    Layout {
        #[command(flatten)]
        io: IoArgs,

        /// Number of iterations
        #[arg(short = 'n', long)]
        iterations: Option<usize>,

        /// Pin the nodes inside this area
        #[arg(
            long,
            num_args = 4,
            value_names = ["LEFT", "RIGHT", "LOWER", "UPPER"],
            allow_negative_numbers = true
        )]
        restrict: Option<Vec<f64>>,
    },
    /// Label every node with a cluster
    Cluster {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        clustering: ClusterArgs,
    },
    /// Build the multi-level hierarchy
    Hierarchy {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        clustering: ClusterArgs,

        /// Maximum number of levels, level 0 included
        #[arg(long)]
        max_levels: Option<usize>,
    },
}

/// Apply clustering flags on top of the configured method
fn clustering_method(configured: ClusteringMethod, args: &ClusterArgs) -> ClusteringMethod {
    let configured_dbscan = match configured {
        ClusteringMethod::Dbscan(params) => Some(params),
        ClusteringMethod::Louvain => None,
    };
    let use_dbscan = match args.method {
        Some(Method::Louvain) => false,
        Some(Method::Dbscan) => true,
        None => configured_dbscan.is_some() || args.epsilon.is_some() || args.min_pts.is_some(),
    };
    if !use_dbscan {
        return ClusteringMethod::Louvain;
    }

    let mut params = configured_dbscan.unwrap_or_default();
    if let Some(epsilon) = args.epsilon {
        params.epsilon = epsilon;
    }
    if let Some(min_pts) = args.min_pts {
        params.min_pts = min_pts;
    }
    ClusteringMethod::Dbscan(params)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn read_graph(registry: &FormatRegistry, input: &Path) -> anyhow::Result<Graph> {
    registry
        .read_graph(input)
        .with_context(|| format!("failed to read graph {}", input.display()))
}

fn emit(registry: &FormatRegistry, io: &IoArgs, document: &Document) -> anyhow::Result<()> {
    let writer = match (&io.format, &io.output) {
        (Some(format), _) => registry
            .writer_for_format(format)
            .with_context(|| format!("unsupported output format: {format}"))?,
        (None, Some(output)) => registry.writer_for_path(output)?,
        (None, None) => registry
            .writer_for_format("json")
            .context("json writer missing")?,
    };

    match &io.output {
        Some(output) => {
            writer
                .write(document, output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Wrote {} output to {}", writer.format_id(), output.display());
        }
        None => println!("{}", writer.render(document)?),
    }
    Ok(())
}

fn layout(
    config: &EngineConfig,
    io: &IoArgs,
    iterations: Option<usize>,
    restrict: Option<&[f64]>,
) -> anyhow::Result<()> {
    let registry = FormatRegistry::with_defaults();
    let graph = read_graph(&registry, &io.input)?;
    let iterations = iterations.unwrap_or(config.layout.iterations);

    let restriction = match restrict {
        Some(&[left, right, lower, upper]) => Some(Area::new(left, right, lower, upper)?),
        Some(other) => anyhow::bail!("--restrict takes 4 values, got {}", other.len()),
        None => config.restriction,
    };

    let mut layouter = NodeLayouter::new(graph, config.layout.clone())?;
    let report = match restriction {
        Some(area) => layouter.restricted_layout(area, iterations)?,
        None => layouter.layout(iterations)?,
    };
    tracing::debug!(?report, "layout report");

    let document = Document::Graph(GraphDocument::from_graph(layouter.graph()));
    emit(&registry, io, &document)
}

fn cluster(config: &EngineConfig, io: &IoArgs, args: &ClusterArgs) -> anyhow::Result<()> {
    let registry = FormatRegistry::with_defaults();
    let graph = read_graph(&registry, &io.input)?;
    let method = clustering_method(config.clustering, args);

    let (labels, modularity) = match method {
        ClusteringMethod::Dbscan(params) => (dbscan_graph(&graph, params)?, None),
        ClusteringMethod::Louvain => {
            let outcome = louvain_graph(&graph)?;
            let labels: Vec<Option<usize>> =
                outcome.partition.labels.into_iter().map(Some).collect();
            (labels, Some(outcome.modularity))
        }
    };

    let document = Document::Clusters(ClusterDocument {
        clustering: method,
        cluster_count: cluster_count(&labels),
        modularity,
        clusters: graph
            .nodes()
            .iter()
            .zip(&labels)
            .map(|(node, label)| ClusterAssignment {
                id: node.id.clone(),
                cluster: *label,
            })
            .collect(),
    });
    emit(&registry, io, &document)
}

fn hierarchy(
    config: &EngineConfig,
    io: &IoArgs,
    args: &ClusterArgs,
    max_levels: Option<usize>,
) -> anyhow::Result<()> {
    let registry = FormatRegistry::with_defaults();
    let graph = read_graph(&registry, &io.input)?;

    let mut hierarchy_config = config.hierarchy;
    if let Some(max_levels) = max_levels {
        hierarchy_config.max_levels = max_levels;
    }
    let builder = HierarchyBuilder::new(clustering_method(config.clustering, args), hierarchy_config);
    let levels = builder.build(graph)?;

    let document = Document::Hierarchy(HierarchyDocument::from_levels(&levels));
    emit(&registry, io, &document)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Layout {
            io,
            iterations,
            restrict,
        } => layout(&config, io, *iterations, restrict.as_deref()),
        Commands::Cluster { io, clustering } => cluster(&config, io, clustering),
        Commands::Hierarchy {
            io,
            clustering,
            max_levels,
        } => hierarchy(&config, io, clustering, *max_levels),
    }
}
