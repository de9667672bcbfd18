//! Java unit extractor.
//!
//! Reference extractor for the pipeline. Walks the tree-sitter CST
//! depth-first, emitting CLASS, FUNCTION, and BLOCK units subject to the
//! triviality filters. Class code is reduced to its shape: every member
//! method body is replaced by `{ }` so class-level similarity tracks fields,
//! signatures, and annotations instead of any one method.

use std::collections::HashMap;

use dashmap::DashMap;
use tree_sitter::Node;

use crate::config::DryConfig;
use crate::error::{DryError, DryResult};
use crate::extractor::{is_trivial_accessor, LanguageExtractor, BLOCK_LINE_FLOOR};
use crate::types::{IndexUnit, UnitType};

const TYPE_DECLARATIONS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
];

/// Extractor for Java source files.
pub struct JavaExtractor {
    /// Per-file call map populated during extraction, keyed by repo-relative
    /// path. Lets call extraction run without a reparse.
    call_cache: DashMap<String, HashMap<String, Vec<String>>>,
}

impl JavaExtractor {
    /// Create a new extractor with an empty call cache.
    pub fn new() -> Self {
        Self { call_cache: DashMap::new() }
    }
}

impl Default for JavaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageExtractor for JavaExtractor {
    fn language_id(&self) -> &'static str {
        "java"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn extract_from_text(
        &self,
        file_path: &str,
        source: &str,
        config: &DryConfig,
    ) -> DryResult<Vec<IndexUnit>> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_java::LANGUAGE.into())
            .map_err(|e| DryError::Extract {
                path: file_path.into(),
                message: format!("failed to load Java grammar: {e}"),
            })?;

        let tree = parser
            .parse(source.as_bytes(), None)
            .ok_or_else(|| DryError::Extract {
                path: file_path.into(),
                message: "tree-sitter returned no tree".into(),
            })?;

        let mut walker = Walker {
            source,
            config,
            file_path,
            units: Vec::new(),
            calls: HashMap::new(),
        };
        walker.visit(tree.root_node(), &[], None);

        self.call_cache
            .insert(file_path.to_string(), walker.calls);

        Ok(walker.units)
    }

    fn extract_calls_from_unit(&self, file_path: &str, unit_id: &str) -> Vec<String> {
        self.call_cache
            .get(file_path)
            .and_then(|calls| calls.get(unit_id).cloned())
            .unwrap_or_default()
    }
}

struct Walker<'a> {
    source: &'a str,
    config: &'a DryConfig,
    file_path: &'a str,
    units: Vec<IndexUnit>,
    calls: HashMap<String, Vec<String>>,
}

impl Walker<'_> {
    fn visit(&mut self, node: Node<'_>, scope: &[String], parent_class_id: Option<&str>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                kind if TYPE_DECLARATIONS.contains(&kind) => {
                    self.handle_class(child, scope, parent_class_id);
                }
                "method_declaration" | "constructor_declaration" => {
                    self.handle_function(child, scope, parent_class_id);
                }
                _ => {
                    if child.child_count() > 0 {
                        self.visit(child, scope, parent_class_id);
                    }
                }
            }
        }
    }

    fn handle_class(&mut self, node: Node<'_>, scope: &[String], parent_class_id: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source).to_string();
        let body = node.child_by_field_name("body");

        // Accessor-only classes are dropped wholesale, descendants included,
        // which is why this check runs before any descent.
        if body.is_some_and(|b| self.class_is_accessor_only(b)) {
            tracing::debug!(
                file = self.file_path,
                class = %name,
                "skipping accessor-only class"
            );
            return;
        }

        let start_line = node.start_position().row as u32;
        let end_line = node.end_position().row as u32;
        let qualified = qualify(scope, &name);
        let span = end_line - start_line + 1;

        let mut class_id = None;
        if span >= self.config.min_lines {
            let id = IndexUnit::derive_id(UnitType::Class, &qualified, start_line, end_line);
            let code = self.class_shape_code(node);
            self.record_calls(&id, node);
            self.units.push(IndexUnit {
                id: id.clone(),
                name: qualified.clone(),
                file_path: self.file_path.to_string(),
                start_line,
                end_line,
                code,
                unit_type: UnitType::Class,
                parent_id: parent_class_id.map(str::to_string),
                embedding: None,
            });
            class_id = Some(id);
        }

        if let Some(body) = body {
            let mut inner_scope = scope.to_vec();
            inner_scope.push(name);
            self.visit(body, &inner_scope, class_id.as_deref());
        }
    }

    fn handle_function(&mut self, node: Node<'_>, scope: &[String], parent_class_id: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let short_name = node_text(name_node, self.source);

        if is_trivial_accessor(short_name) {
            return;
        }

        let start_line = node.start_position().row as u32;
        let end_line = node.end_position().row as u32;
        if end_line - start_line + 1 < self.config.min_lines {
            return;
        }

        let qualified = qualify(scope, short_name);
        let id = IndexUnit::derive_id(UnitType::Function, &qualified, start_line, end_line);
        self.record_calls(&id, node);
        self.units.push(IndexUnit {
            id: id.clone(),
            name: qualified.clone(),
            file_path: self.file_path.to_string(),
            start_line,
            end_line,
            code: node_text(node, self.source).to_string(),
            unit_type: UnitType::Function,
            parent_id: parent_class_id.map(str::to_string),
            embedding: None,
        });

        if let Some(body) = node.child_by_field_name("body") {
            self.collect_blocks(body, body, &id, &qualified);
        }
    }

    /// Emit qualifying `block` nodes nested under a function body.
    ///
    /// The body node itself is not a block unit; local type declarations end
    /// the descent so another class's statements are never attributed here.
    fn collect_blocks(&mut self, node: Node<'_>, body: Node<'_>, function_id: &str, qualified: &str) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if TYPE_DECLARATIONS.contains(&child.kind()) {
                continue;
            }
            if child.kind() == "block" && child.id() != body.id() {
                let start_line = child.start_position().row as u32;
                let end_line = child.end_position().row as u32;
                let floor = BLOCK_LINE_FLOOR.max(self.config.min_block_lines);
                if end_line - start_line + 1 >= floor {
                    let id =
                        IndexUnit::derive_id(UnitType::Block, qualified, start_line, end_line);
                    self.record_calls(&id, child);
                    self.units.push(IndexUnit {
                        id,
                        name: qualified.to_string(),
                        file_path: self.file_path.to_string(),
                        start_line,
                        end_line,
                        code: node_text(child, self.source).to_string(),
                        unit_type: UnitType::Block,
                        parent_id: Some(function_id.to_string()),
                        embedding: None,
                    });
                }
            }
            if child.child_count() > 0 {
                self.collect_blocks(child, body, function_id, qualified);
            }
        }
    }

    /// True when every member method is a trivial accessor and the class has
    /// no constructors or nested types. Such a class carries no comparable
    /// behavior.
    fn class_is_accessor_only(&self, body: Node<'_>) -> bool {
        let mut methods = 0usize;
        let mut disqualified = false;
        self.scan_members(body, &mut methods, &mut disqualified);
        methods > 0 && !disqualified
    }

    fn scan_members(&self, node: Node<'_>, methods: &mut usize, disqualified: &mut bool) {
        if *disqualified {
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                kind if TYPE_DECLARATIONS.contains(&kind) => {
                    *disqualified = true;
                    return;
                }
                "constructor_declaration" => {
                    *disqualified = true;
                    return;
                }
                "method_declaration" => {
                    let name = child
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.source))
                        .unwrap_or_default();
                    if is_trivial_accessor(name) {
                        *methods += 1;
                    } else {
                        *disqualified = true;
                        return;
                    }
                }
                _ => {
                    if child.child_count() > 0 {
                        self.scan_members(child, methods, disqualified);
                    }
                }
            }
        }
    }

    /// Class source with every member-method body replaced by `{ }`.
    fn class_shape_code(&self, class_node: Node<'_>) -> String {
        let mut body_ranges: Vec<(usize, usize)> = Vec::new();
        collect_method_body_ranges(class_node, &mut body_ranges);
        body_ranges.sort_unstable();

        let class_start = class_node.start_byte();
        let class_end = class_node.end_byte();
        let mut out = String::with_capacity(class_end - class_start);
        let mut cursor = class_start;

        for (start, end) in body_ranges {
            if start < cursor {
                // Nested inside an already-replaced body (anonymous class).
                continue;
            }
            let segment = &self.source[cursor..start];
            out.push_str(segment.trim_end());
            out.push_str(" { }");
            cursor = end;
        }
        out.push_str(&self.source[cursor..class_end]);
        out
    }

    fn record_calls(&mut self, unit_id: &str, node: Node<'_>) {
        let mut callees = Vec::new();
        collect_method_invocations(node, self.source, &mut callees);
        if !callees.is_empty() {
            self.calls.insert(unit_id.to_string(), callees);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn qualify(scope: &[String], name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope.join("."), name)
    }
}

fn collect_method_body_ranges(node: Node<'_>, ranges: &mut Vec<(usize, usize)>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "method_declaration" | "constructor_declaration") {
            if let Some(body) = child.child_by_field_name("body") {
                ranges.push((body.start_byte(), body.end_byte()));
            }
        }
        if child.child_count() > 0 {
            collect_method_body_ranges(child, ranges);
        }
    }
}

fn collect_method_invocations(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "method_invocation" {
            if let Some(name) = child.child_by_field_name("name") {
                let callee = node_text(name, source).to_string();
                if !callee.is_empty() && !out.contains(&callee) {
                    out.push(callee);
                }
            }
        }
        if child.child_count() > 0 {
            collect_method_invocations(child, source, out);
        }
    }
}
