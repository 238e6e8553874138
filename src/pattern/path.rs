// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Paths into a pattern tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ChannelId;

/// One step from a node to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    /// Child of a `Sequence` by position
    Index(usize),
    /// Body of a `Repeat`
    Repeat,
    /// Branch of a `Parallel` by channel
    Channel(ChannelId),
}

/// Location of a node, as the list of steps from the root.
///
/// Renders as `root/[1]/repeat/ch[2]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    /// Path of the root node.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path of the `index`-th sequence child.
    pub fn child_index(&self, index: usize) -> Self {
        self.join(PathSegment::Index(index))
    }

    /// Path of a repeat body.
    pub fn repeat_body(&self) -> Self {
        self.join(PathSegment::Repeat)
    }

    /// Path of a parallel branch.
    pub fn branch(&self, channel: ChannelId) -> Self {
        self.join(PathSegment::Channel(channel))
    }

    fn join(&self, segment: PathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment);
        Self(segments)
    }

    /// Steps from the root.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Nesting depth (root = 0).
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for segment in &self.0 {
            match segment {
                PathSegment::Index(i) => write!(f, "/[{}]", i)?,
                PathSegment::Repeat => write!(f, "/repeat")?,
                PathSegment::Channel(ch) => write!(f, "/ch[{}]", ch)?,
            }
        }
        Ok(())
    }
}
