//! GLSL uniform reflection
//!
//! Produces a [`ShaderInterface`] from preprocessed stage text: every
//! top-level `uniform` declaration (including uniform block members), the
//! struct layouts they reference, and any semantic annotation written on the
//! line before a declaration:
//!
//! ```glsl
//! ["BloomThreshold"]
//! uniform float u_Threshold;
//! ```
//!
//! Annotation lines are not valid GLSL; [`strip_annotations`] removes them
//! before stage text reaches a driver.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::preprocess::PreprocessedSource;
use crate::{Result, ShaderError};

/// Data type of a declared uniform or struct field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderDataType {
    Bool,
    Int,
    Int2,
    Int3,
    Int4,
    Float,
    Float2,
    Float3,
    Float4,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
    /// User struct; the layout lives in [`ShaderInterface::struct_layout`]
    Struct,
}

impl ShaderDataType {
    /// Map a GLSL type keyword
    pub fn from_glsl(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "bool" => Self::Bool,
            "int" | "uint" => Self::Int,
            "ivec2" | "uvec2" => Self::Int2,
            "ivec3" | "uvec3" => Self::Int3,
            "ivec4" | "uvec4" => Self::Int4,
            "float" => Self::Float,
            "vec2" => Self::Float2,
            "vec3" => Self::Float3,
            "vec4" => Self::Float4,
            "mat2" => Self::Mat2,
            "mat3" => Self::Mat3,
            "mat4" => Self::Mat4,
            "sampler2D" | "sampler2DShadow" | "isampler2D" | "usampler2D" => Self::Sampler2D,
            "samplerCube" | "samplerCubeShadow" => Self::SamplerCube,
            _ => return None,
        })
    }

    /// Bytes occupied by one element when packed tightly
    pub const fn size(&self) -> usize {
        match self {
            Self::Bool | Self::Int | Self::Float => 4,
            Self::Int2 | Self::Float2 => 8,
            Self::Int3 | Self::Float3 => 12,
            Self::Int4 | Self::Float4 | Self::Mat2 => 16,
            Self::Mat3 => 36,
            Self::Mat4 => 64,
            // Samplers occupy an integer texture unit
            Self::Sampler2D | Self::SamplerCube => 4,
            Self::Struct => 0,
        }
    }

    pub const fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler2D | Self::SamplerCube)
    }
}

impl fmt::Display for ShaderDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One declared uniform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformDescriptor {
    /// Name as written in GLSL
    pub name: String,
    /// Semantic name from an annotation, else the GLSL name
    pub variable_name: String,
    pub ty: ShaderDataType,
    /// `Some(n)` for `name[n]`
    pub array_len: Option<usize>,
    /// Struct type name when `ty` is [`ShaderDataType::Struct`]
    pub struct_name: Option<String>,
}

impl UniformDescriptor {
    pub fn new(name: impl Into<String>, ty: ShaderDataType) -> Self {
        let name = name.into();
        Self {
            variable_name: name.clone(),
            name,
            ty,
            array_len: None,
            struct_name: None,
        }
    }

    pub fn with_array_len(mut self, len: usize) -> Self {
        self.array_len = Some(len);
        self
    }

    pub fn with_variable_name(mut self, variable_name: impl Into<String>) -> Self {
        self.variable_name = variable_name.into();
        self
    }

    pub fn is_array(&self) -> bool {
        self.array_len.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: ShaderDataType,
    pub array_len: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The uniform interface of a compiled shader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderInterface {
    uniforms: Vec<UniformDescriptor>,
    structs: HashMap<String, StructLayout>,
}

impl ShaderInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniform; a repeated GLSL name keeps the first declaration
    pub fn push(&mut self, descriptor: UniformDescriptor) {
        if !self.uniforms.iter().any(|u| u.name == descriptor.name) {
            self.uniforms.push(descriptor);
        }
    }

    pub fn push_struct(&mut self, layout: StructLayout) {
        self.structs.entry(layout.name.clone()).or_insert(layout);
    }

    /// Union of two interfaces, as when several stages share a program
    pub fn merge(&mut self, other: &ShaderInterface) {
        for layout in other.structs.values() {
            self.push_struct(layout.clone());
        }
        for uniform in &other.uniforms {
            self.push(uniform.clone());
        }
    }

    pub fn uniforms(&self) -> &[UniformDescriptor] {
        &self.uniforms
    }

    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&UniformDescriptor> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn by_variable_name(&self, variable_name: &str) -> Option<&UniformDescriptor> {
        self.uniforms.iter().find(|u| u.variable_name == variable_name)
    }

    pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
        self.structs.get(name)
    }

    /// Whether a uniform location path such as `u_LightSources[3].Color`
    /// names something the shader declares
    pub fn contains(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Element type addressed by a location path
    ///
    /// An array uniform named without an index resolves to its element type.
    pub fn resolve(&self, path: &str) -> Option<ShaderDataType> {
        let (base, rest) = split_segment(path);
        let descriptor = self.get(base)?;
        let rest = consume_index(rest, descriptor.array_len)?;
        if rest.is_empty() {
            return Some(descriptor.ty);
        }

        let layout = self.structs.get(descriptor.struct_name.as_deref()?)?;
        let (field_name, rest) = split_segment(rest.strip_prefix('.')?);
        let field = layout.field(field_name)?;
        let rest = consume_index(rest, field.array_len)?;
        rest.is_empty().then_some(field.ty)
    }
}

fn split_segment(path: &str) -> (&str, &str) {
    let end = path.find(['[', '.']).unwrap_or(path.len());
    path.split_at(end)
}

/// Strip one `[i]` when the declaration is an array, checking bounds
fn consume_index(rest: &str, array_len: Option<usize>) -> Option<&str> {
    let Some(inner) = rest.strip_prefix('[') else {
        return Some(rest);
    };
    let len = array_len?;
    let (index, rest) = inner.split_once(']')?;
    let index: usize = index.trim().parse().ok()?;
    (index < len).then_some(rest)
}

/// Remove `["Name"]` annotation lines from stage text
pub fn strip_annotations(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        if parse_annotation(line).is_none() {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn parse_annotation(line: &str) -> Option<&str> {
    let inner = line.trim().strip_prefix("[\"")?.strip_suffix("\"]")?;
    (!inner.is_empty() && !inner.contains('"')).then_some(inner)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(i64),
    Punct(char),
    Annotation(String),
}

fn tokenize(lines: &[String]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut in_block_comment = false;

    for line in lines {
        if !in_block_comment {
            if let Some(name) = parse_annotation(line) {
                tokens.push(Token::Annotation(name.to_string()));
                continue;
            }
            if line.trim_start().starts_with('#') {
                continue;
            }
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if in_block_comment {
                if c == '*' && chars.get(i + 1) == Some(&'/') {
                    in_block_comment = false;
                    i += 1;
                }
                i += 1;
                continue;
            }
            if c == '/' && chars.get(i + 1) == Some(&'/') {
                break;
            }
            if c == '/' && chars.get(i + 1) == Some(&'*') {
                in_block_comment = true;
                i += 2;
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
                continue;
            }
            if c.is_ascii_digit() {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let digits = text.trim_end_matches(['u', 'U']);
                match digits.parse() {
                    Ok(n) => tokens.push(Token::Number(n)),
                    // Float literals only matter as opaque values
                    Err(_) => tokens.push(Token::Word(text)),
                }
                continue;
            }
            if !c.is_whitespace() {
                tokens.push(Token::Punct(c));
            }
            i += 1;
        }
    }
    tokens
}

const PRECISION_QUALIFIERS: [&str; 3] = ["highp", "mediump", "lowp"];

struct Parser<'a> {
    shader: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    source: &'a PreprocessedSource,
    constants: HashMap<String, i64>,
    interface: ShaderInterface,
}

/// Reflect the uniform interface of one preprocessed stage
pub fn reflect(shader: &str, source: &PreprocessedSource) -> Result<ShaderInterface> {
    let mut parser = Parser {
        shader,
        tokens: tokenize(&source.lines),
        pos: 0,
        source,
        constants: HashMap::new(),
        interface: ShaderInterface::new(),
    };
    parser.parse()?;
    Ok(parser.interface)
}

impl<'a> Parser<'a> {
    fn parse(&mut self) -> Result<()> {
        let mut annotation: Option<String> = None;

        while let Some(token) = self.peek().cloned() {
            match token {
                Token::Annotation(name) => {
                    annotation = Some(name);
                    self.pos += 1;
                }
                Token::Word(word) if word == "struct" => {
                    self.pos += 1;
                    self.parse_struct()?;
                    annotation = None;
                }
                Token::Word(word) if word == "layout" => {
                    self.pos += 1;
                    self.skip_group('(', ')');
                }
                Token::Word(word) if word == "uniform" => {
                    self.pos += 1;
                    self.parse_uniform(annotation.take())?;
                }
                Token::Word(word) if word == "const" => {
                    self.pos += 1;
                    self.parse_const();
                    annotation = None;
                }
                Token::Punct('{') => {
                    self.skip_group('{', '}');
                    annotation = None;
                }
                Token::Punct(';') => {
                    self.pos += 1;
                    annotation = None;
                }
                _ => self.pos += 1,
            }
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ShaderError {
        ShaderError::Parse {
            shader: self.shader.to_string(),
            message: message.into(),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(self.error(format!("expected {}, found {:?}", what, other))),
        }
    }

    fn expect_punct(&mut self, punct: char) -> Result<()> {
        match self.next() {
            Some(Token::Punct(c)) if c == punct => Ok(()),
            other => Err(self.error(format!("expected '{}', found {:?}", punct, other))),
        }
    }

    fn skip_group(&mut self, open: char, close: char) {
        if self.peek() != Some(&Token::Punct(open)) {
            return;
        }
        let mut depth = 0usize;
        while let Some(token) = self.next() {
            match token {
                Token::Punct(c) if c == open => depth += 1,
                Token::Punct(c) if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Type keyword after optional precision qualifier
    fn parse_type(&mut self) -> Result<(ShaderDataType, Option<String>)> {
        let mut word = self.expect_word("a type")?;
        if PRECISION_QUALIFIERS.contains(&word.as_str()) {
            word = self.expect_word("a type")?;
        }
        if let Some(ty) = ShaderDataType::from_glsl(&word) {
            return Ok((ty, None));
        }
        if self.interface.structs.contains_key(&word) {
            return Ok((ShaderDataType::Struct, Some(word)));
        }
        Err(self.error(format!("unknown uniform type '{}'", word)))
    }

    fn parse_array_len(&mut self) -> Result<Option<usize>> {
        if self.peek() != Some(&Token::Punct('[')) {
            return Ok(None);
        }
        self.pos += 1;
        let len = match self.next() {
            Some(Token::Number(n)) => n,
            Some(Token::Word(name)) => self
                .constants
                .get(&name)
                .copied()
                .or_else(|| self.source.integer(&name))
                .ok_or_else(|| self.error(format!("unresolved array size '{}'", name)))?,
            other => return Err(self.error(format!("invalid array size {:?}", other))),
        };
        self.expect_punct(']')?;
        usize::try_from(len)
            .ok()
            .filter(|&n| n > 0)
            .map(Some)
            .ok_or_else(|| self.error(format!("array size must be positive, got {}", len)))
    }

    fn parse_struct(&mut self) -> Result<()> {
        let name = self.expect_word("a struct name")?;
        self.expect_punct('{')?;
        let mut fields = Vec::new();

        loop {
            if self.peek() == Some(&Token::Punct('}')) {
                self.pos += 1;
                break;
            }
            let (ty, _) = self.parse_type()?;
            loop {
                let field_name = self.expect_word("a field name")?;
                let array_len = self.parse_array_len()?;
                fields.push(StructField {
                    name: field_name,
                    ty,
                    array_len,
                });
                match self.next() {
                    Some(Token::Punct(',')) => continue,
                    Some(Token::Punct(';')) => break,
                    other => {
                        return Err(self.error(format!("unexpected {:?} in struct {}", other, name)))
                    }
                }
            }
        }
        // Optional trailing ';'
        if self.peek() == Some(&Token::Punct(';')) {
            self.pos += 1;
        }

        self.interface.push_struct(StructLayout { name, fields });
        Ok(())
    }

    fn parse_uniform(&mut self, annotation: Option<String>) -> Result<()> {
        // Uniform block: `uniform Name { members } [instance];`
        if let (Some(Token::Word(_)), Some(Token::Punct('{'))) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            return self.parse_uniform_block();
        }

        let (ty, struct_name) = self.parse_type()?;
        let mut annotation = annotation;
        loop {
            let name = self.expect_word("a uniform name")?;
            let array_len = self.parse_array_len()?;
            let variable_name = annotation.take().unwrap_or_else(|| name.clone());
            self.interface.push(UniformDescriptor {
                name,
                variable_name,
                ty,
                array_len,
                struct_name: struct_name.clone(),
            });
            match self.next() {
                Some(Token::Punct(',')) => continue,
                Some(Token::Punct(';')) => return Ok(()),
                // `uniform float x = 1.0;` initialisers
                Some(Token::Punct('=')) => {
                    while let Some(token) = self.next() {
                        if token == Token::Punct(';') {
                            return Ok(());
                        }
                    }
                    return Err(self.error("unterminated uniform initialiser"));
                }
                other => return Err(self.error(format!("unexpected {:?} after uniform", other))),
            }
        }
    }

    fn parse_uniform_block(&mut self) -> Result<()> {
        let block = self.expect_word("a block name")?;
        self.expect_punct('{')?;
        let mut members = Vec::new();
        loop {
            if self.peek() == Some(&Token::Punct('}')) {
                self.pos += 1;
                break;
            }
            let (ty, struct_name) = self.parse_type()?;
            let name = self.expect_word("a member name")?;
            let array_len = self.parse_array_len()?;
            self.expect_punct(';')?;
            members.push((name, ty, array_len, struct_name));
        }
        let instance = match self.peek() {
            Some(Token::Word(_)) => Some(self.expect_word("an instance name")?),
            _ => None,
        };
        self.expect_punct(';')?;

        log::trace!("Reflected uniform block '{}' ({} members)", block, members.len());
        for (name, ty, array_len, struct_name) in members {
            let name = match &instance {
                Some(instance) => format!("{}.{}", instance, name),
                None => name,
            };
            self.interface.push(UniformDescriptor {
                variable_name: name.clone(),
                name,
                ty,
                array_len,
                struct_name,
            });
        }
        Ok(())
    }

    /// Record `const int NAME = N;` for array sizes; other consts are skipped
    fn parse_const(&mut self) {
        let is_int = matches!(self.peek(), Some(Token::Word(w)) if w == "int" || w == "uint");
        if is_int {
            if let (Some(Token::Word(name)), Some(Token::Punct('=')), Some(Token::Number(value))) = (
                self.tokens.get(self.pos + 1).cloned(),
                self.tokens.get(self.pos + 2).cloned(),
                self.tokens.get(self.pos + 3).cloned(),
            ) {
                self.constants.insert(name, value);
            }
        }
        while let Some(token) = self.next() {
            if token == Token::Punct(';') {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Preprocessor;

    fn reflect_str(source: &str) -> ShaderInterface {
        let pre = Preprocessor::new().run(source).unwrap();
        reflect("test", &pre).unwrap()
    }

    #[test]
    fn test_plain_uniforms() {
        let iface = reflect_str(
            "uniform mat4 u_ModelMatrix;\nuniform highp vec3 u_Color, u_Tint;\nuniform sampler2D u_Albedo;\n",
        );
        assert_eq!(iface.len(), 4);
        assert_eq!(iface.resolve("u_ModelMatrix"), Some(ShaderDataType::Mat4));
        assert_eq!(iface.resolve("u_Tint"), Some(ShaderDataType::Float3));
        assert!(iface.get("u_Albedo").unwrap().ty.is_sampler());
    }

    #[test]
    fn test_annotation_sets_variable_name() {
        let iface = reflect_str("[\"BloomThreshold\"]\nuniform float u_Threshold;\nuniform float u_Other;\n");
        assert_eq!(iface.get("u_Threshold").unwrap().variable_name, "BloomThreshold");
        assert_eq!(iface.get("u_Other").unwrap().variable_name, "u_Other");
        assert!(iface.by_variable_name("BloomThreshold").is_some());
    }

    #[test]
    fn test_struct_array_paths() {
        let iface = reflect_str(
            "const int MAX_LIGHT_COUNT = 4;\n\
             struct Light { int Type; vec3 Color; float Weights[2]; };\n\
             uniform Light u_Lights[MAX_LIGHT_COUNT];\n",
        );
        assert_eq!(iface.get("u_Lights").unwrap().array_len, Some(4));
        assert_eq!(iface.resolve("u_Lights[3].Color"), Some(ShaderDataType::Float3));
        assert_eq!(iface.resolve("u_Lights[0].Weights[1]"), Some(ShaderDataType::Float));
        assert!(!iface.contains("u_Lights[4].Color"));
        assert!(!iface.contains("u_Lights[0].Missing"));
        assert!(!iface.contains("u_Lights[0].Weights[2]"));
    }

    #[test]
    fn test_array_size_from_define() {
        let iface = reflect_str("#define JOINT_COUNT 16\nuniform mat4 u_JointTransforms[JOINT_COUNT];\n");
        assert_eq!(iface.get("u_JointTransforms").unwrap().array_len, Some(16));
        assert_eq!(iface.resolve("u_JointTransforms[15]"), Some(ShaderDataType::Mat4));
    }

    #[test]
    fn test_functions_and_comments_ignored() {
        let iface = reflect_str(
            "// uniform float u_Commented;\n\
             /* uniform float u_Block;\n still comment */\n\
             float helper(float x) { float uniform_like = x; return x; }\n\
             layout(location = 0) out vec4 f_Color;\n\
             uniform float u_Real;\n",
        );
        assert_eq!(iface.len(), 1);
        assert!(iface.contains("u_Real"));
    }

    #[test]
    fn test_uniform_block_members() {
        let iface = reflect_str("layout(std140) uniform Camera { mat4 View; vec3 Position; } camera;\n");
        assert_eq!(iface.resolve("camera.View"), Some(ShaderDataType::Mat4));
        assert_eq!(iface.resolve("camera.Position"), Some(ShaderDataType::Float3));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let pre = Preprocessor::new().run("uniform image2D u_Image;\n").unwrap();
        assert!(matches!(reflect("bad", &pre), Err(ShaderError::Parse { .. })));
    }

    #[test]
    fn test_unresolved_array_size_is_error() {
        let pre = Preprocessor::new().run("uniform float u_Values[COUNT];\n").unwrap();
        assert!(reflect("bad", &pre).is_err());
    }

    #[test]
    fn test_merge_keeps_first() {
        let mut a = reflect_str("uniform float u_A;\n");
        let b = reflect_str("uniform float u_A;\nuniform int u_B;\n");
        a.merge(&b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_strip_annotations() {
        let out = strip_annotations("[\"Exposure\"]\nuniform float u_Exposure;\n");
        assert_eq!(out, "uniform float u_Exposure;\n");
    }
}
