//! Radix tree node implementation.
//!
//! Each node owns one path segment. Matching walks the tree depth-first and
//! tries children in a fixed order at every level: static, then parameter,
//! then catch-all. The walk backtracks fully, so a failed static branch
//! never hides a parameter branch further down.

use std::ops::ControlFlow;

use crate::error::RouteError;
use crate::method_table::MethodTable;

/// Type of a template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    /// Literal segment (e.g., "users").
    Static(String),
    /// Named parameter (e.g., "{id}").
    Param(String),
    /// Catch-all covering the rest of the path (e.g., "*path").
    Wildcard(String),
}

/// A registered template ending at a node.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint<T> {
    /// The template as registered.
    pub template: String,
    /// Parameter names in template order.
    pub param_names: Vec<String>,
    /// Values by method.
    pub methods: MethodTable<T>,
}

/// A node in the radix tree.
#[derive(Debug, Clone)]
pub(crate) struct Node<T> {
    /// The literal segment for static nodes; empty otherwise.
    segment: String,
    /// Endpoint registered at this node, if any.
    endpoint: Option<Endpoint<T>>,
    /// Static children, sorted by segment for binary search.
    static_children: Vec<Node<T>>,
    /// Parameter child (at most one per node).
    param_child: Option<Box<Node<T>>>,
    /// Catch-all child (at most one per node, always a leaf).
    wildcard_child: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn with_segment(segment: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            endpoint: None,
            static_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
        }
    }

    /// Creates the root node.
    pub fn root() -> Self {
        Self::with_segment("")
    }

    /// Parses a template into segments.
    pub fn parse_template(template: &str) -> Result<Vec<SegmentKind>, RouteError> {
        if !template.starts_with('/') {
            return Err(RouteError::invalid_template(template, "must start with '/'"));
        }

        let raw: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut seen = Vec::new();

        for (index, s) in raw.iter().enumerate() {
            let kind = if let Some(inner) = s.strip_prefix('{') {
                let name = inner.strip_suffix('}').ok_or_else(|| {
                    RouteError::invalid_template(template, format!("unclosed parameter '{s}'"))
                })?;
                SegmentKind::Param(Self::check_name(template, name)?)
            } else if let Some(name) = s.strip_prefix('*') {
                if index + 1 != raw.len() {
                    return Err(RouteError::invalid_template(
                        template,
                        "catch-all must be the last segment",
                    ));
                }
                SegmentKind::Wildcard(Self::check_name(template, name)?)
            } else if s.contains(['{', '}']) {
                return Err(RouteError::invalid_template(
                    template,
                    format!("parameter must span a whole segment: '{s}'"),
                ));
            } else {
                SegmentKind::Static((*s).to_string())
            };

            if let SegmentKind::Param(name) | SegmentKind::Wildcard(name) = &kind {
                if seen.contains(name) {
                    return Err(RouteError::invalid_template(
                        template,
                        format!("parameter '{name}' appears twice"),
                    ));
                }
                seen.push(name.clone());
            }
            segments.push(kind);
        }

        Ok(segments)
    }

    fn check_name(template: &str, name: &str) -> Result<String, RouteError> {
        if name.is_empty() {
            return Err(RouteError::invalid_template(template, "empty parameter name"));
        }
        Ok(name.to_string())
    }

    /// Inserts `value` under `template` for `method`.
    pub fn insert(&mut self, template: &str, method: &str, value: T) -> Result<(), RouteError> {
        let segments = Self::parse_template(template)?;
        let param_names: Vec<String> = segments
            .iter()
            .filter_map(|s| match s {
                SegmentKind::Param(n) | SegmentKind::Wildcard(n) => Some(n.clone()),
                SegmentKind::Static(_) => None,
            })
            .collect();

        let node = self.descend_or_create(&segments);
        let endpoint = node.endpoint.get_or_insert_with(|| Endpoint {
            template: template.to_string(),
            param_names: param_names.clone(),
            methods: MethodTable::new(),
        });

        if endpoint.param_names != param_names {
            return Err(RouteError::ParamConflict {
                template: template.to_string(),
                existing: endpoint.template.clone(),
            });
        }

        endpoint
            .methods
            .insert(method, value)
            .map_err(|_| RouteError::Duplicate {
                template: endpoint.template.clone(),
                method: crate::method_table::normalize_method(method),
            })
    }

    fn descend_or_create(&mut self, segments: &[SegmentKind]) -> &mut Self {
        let Some((first, rest)) = segments.split_first() else {
            return self;
        };

        let child = match first {
            SegmentKind::Static(segment) => {
                let index = match self
                    .static_children
                    .binary_search_by(|c| c.segment.as_str().cmp(segment))
                {
                    Ok(i) => i,
                    Err(i) => {
                        self.static_children.insert(i, Self::with_segment(segment.clone()));
                        i
                    }
                };
                &mut self.static_children[index]
            }
            SegmentKind::Param(_) => self
                .param_child
                .get_or_insert_with(|| Box::new(Self::with_segment(""))),
            SegmentKind::Wildcard(_) => self
                .wildcard_child
                .get_or_insert_with(|| Box::new(Self::with_segment(""))),
        };
        child.descend_or_create(rest)
    }

    /// Visits every endpoint whose template matches `segments`, in priority order.
    ///
    /// `captured` accumulates parameter values along the current branch and
    /// is restored before each alternative is tried. The visitor stops the
    /// walk by returning `ControlFlow::Break`.
    pub fn visit<'a, F>(
        &'a self,
        segments: &[&str],
        captured: &mut Vec<String>,
        visitor: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(&'a Endpoint<T>, &[String]) -> ControlFlow<()>,
    {
        let Some((segment, rest)) = segments.split_first() else {
            return match &self.endpoint {
                Some(endpoint) => visitor(endpoint, captured.as_slice()),
                None => ControlFlow::Continue(()),
            };
        };

        if let Ok(i) = self
            .static_children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
        {
            self.static_children[i].visit(rest, captured, visitor)?;
        }

        if let Some(child) = &self.param_child {
            captured.push((*segment).to_string());
            let flow = child.visit(rest, captured, visitor);
            captured.pop();
            flow?;
        }

        if let Some(child) = &self.wildcard_child {
            if let Some(endpoint) = &child.endpoint {
                captured.push(segments.join("/"));
                let flow = visitor(endpoint, captured.as_slice());
                captured.pop();
                flow?;
            }
        }

        ControlFlow::Continue(())
    }
}
