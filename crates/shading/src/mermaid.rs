//! Mermaid `flowchart` export of a material graph.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::bsdf::{Bsdf, MapSource};
use crate::mix::{Channel, MixChannel, ScalarSource};
use crate::texture::Texture;
use crate::types::{ChannelId, NodeId};

/// Node a graph export starts from.
#[derive(Clone, Copy)]
pub enum GraphRoot<'a> {
    Bsdf(&'a Bsdf),
    Mix(&'a MixChannel),
    Channel(&'a Channel),
    Map(&'a MapSource),
}

impl<'a> From<&'a Bsdf> for GraphRoot<'a> {
    fn from(bsdf: &'a Bsdf) -> Self {
        GraphRoot::Bsdf(bsdf)
    }
}

impl<'a> From<&'a MixChannel> for GraphRoot<'a> {
    fn from(mix: &'a MixChannel) -> Self {
        GraphRoot::Mix(mix)
    }
}

impl<'a> From<&'a Channel> for GraphRoot<'a> {
    fn from(channel: &'a Channel) -> Self {
        GraphRoot::Channel(channel)
    }
}

impl<'a> From<&'a MapSource> for GraphRoot<'a> {
    fn from(map: &'a MapSource) -> Self {
        GraphRoot::Map(map)
    }
}

/// Renders the graph under `root` as a top-down mermaid flowchart.
///
/// Edges run from input to consumer. Nodes reachable along several paths are
/// declared once; every constant gets its own leaf.
pub fn to_mermaid<'a>(root: impl Into<GraphRoot<'a>>) -> String {
    let mut graph = Graph::default();
    match root.into() {
        GraphRoot::Bsdf(bsdf) => graph.bsdf(bsdf),
        GraphRoot::Mix(mix) => graph.mix(mix),
        GraphRoot::Channel(channel) => graph.channel(channel),
        GraphRoot::Map(map) => graph.map(map),
    };
    let mut out = String::from("flowchart TD\n");
    for line in &graph.lines {
        let _ = writeln!(out, "    {line}");
    }
    out
}

#[derive(Default)]
struct Graph {
    declared: HashSet<NodeId>,
    constants: usize,
    lines: Vec<String>,
}

impl Graph {
    /// Declares the node once. Returns its key and whether it was new.
    fn declare(&mut self, id: NodeId, label: String) -> (String, bool) {
        let key = format!("n{id}");
        let fresh = self.declared.insert(id);
        if fresh {
            self.lines.push(format!("{key}[\"{label}\"]"));
        }
        (key, fresh)
    }

    fn edge(&mut self, from: &str, to: &str, label: &str) {
        self.lines.push(format!("{from} -->|{label}| {to}"));
    }

    fn constant(&mut self, label: String) -> String {
        let key = format!("c{}", self.constants);
        self.constants += 1;
        self.lines.push(format!("{key}([\"{label}\"])"));
        key
    }

    fn texture(&mut self, texture: &Texture) -> String {
        let (width, height) = texture.size();
        let label = format!("Texture {width}x{height} {:?}", texture.format());
        self.declare(texture.id(), label).0
    }

    fn channel(&mut self, channel: &Channel) -> String {
        let label = format!("Channel {}", channel.channel().label());
        let (key, fresh) = self.declare(channel.id(), label);
        if fresh {
            let texture = self.texture(&channel.texture());
            self.edge(&texture, &key, "band");
        }
        key
    }

    fn scalar(&mut self, source: &ScalarSource) -> String {
        match source {
            ScalarSource::Constant(value) => self.constant(format!("{value}")),
            ScalarSource::Channel(channel) => self.channel(channel),
        }
    }

    fn mix(&mut self, mix: &MixChannel) -> String {
        let (width, height) = mix.size();
        let (key, fresh) = self.declare(mix.id(), format!("MixChannel {width}x{height}"));
        if fresh {
            for band in [ChannelId::R, ChannelId::G, ChannelId::B, ChannelId::A] {
                let input = self.scalar(&mix.slot(band));
                self.edge(&input, &key, &band.label().to_ascii_lowercase());
            }
        }
        key
    }

    fn map(&mut self, map: &MapSource) -> String {
        match map {
            MapSource::Texture(texture) => self.texture(texture),
            MapSource::Mix(mix) => self.mix(mix),
        }
    }

    fn bsdf(&mut self, bsdf: &Bsdf) -> String {
        let (key, fresh) = self.declare(bsdf.id(), "Bsdf".to_string());
        if fresh {
            let base_color = self.map(bsdf.base_color());
            self.edge(&base_color, &key, "base_color");
            let smoothness = self.scalar(bsdf.smoothness());
            self.edge(&smoothness, &key, "smoothness");
            let normal = self.map(bsdf.normal());
            self.edge(&normal, &key, "normal");
            let emission = self.scalar(bsdf.emission());
            self.edge(&emission, &key, "emission");
        }
        key
    }
}
