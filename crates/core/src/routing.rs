//! 有序路由表
//!
//! 规则按顺序逐条求值，第一条命中的规则决定目标；全部未命中时返回默认目标。
//! 谓词通过 [`RoutePredicate`] 可替换，关键字子串匹配只是默认实现。

use std::fmt;
use std::sync::Arc;

/// 路由谓词
pub trait RoutePredicate: Send + Sync {
    fn matches(&self, subject: &str) -> bool;

    /// 用于路由表自省的描述
    fn describe(&self) -> String;
}

/// 关键字子串匹配（忽略大小写）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordPredicate {
    keywords: Vec<String>,
}

impl KeywordPredicate {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl RoutePredicate for KeywordPredicate {
    fn matches(&self, subject: &str) -> bool {
        let subject = subject.to_lowercase();
        self.keywords.iter().any(|k| subject.contains(k.as_str()))
    }

    fn describe(&self) -> String {
        format!("keywords({})", self.keywords.join("|"))
    }
}

/// 基于闭包的谓词
pub struct FnPredicate<F> {
    name: String,
    func: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> RoutePredicate for FnPredicate<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, subject: &str) -> bool {
        (self.func)(subject)
    }

    fn describe(&self) -> String {
        format!("fn({})", self.name)
    }
}

/// 一条路由规则
#[derive(Clone)]
pub struct RoutingRule<T> {
    pub name: String,
    pub predicate: Arc<dyn RoutePredicate>,
    pub target: T,
}

impl<T> RoutingRule<T> {
    pub fn new(name: impl Into<String>, predicate: Arc<dyn RoutePredicate>, target: T) -> Self {
        Self {
            name: name.into(),
            predicate,
            target,
        }
    }

    pub fn keywords<I, S>(name: impl Into<String>, keywords: I, target: T) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, Arc::new(KeywordPredicate::new(keywords)), target)
    }
}

impl<T: fmt::Debug> fmt::Debug for RoutingRule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingRule")
            .field("name", &self.name)
            .field("predicate", &self.predicate.describe())
            .field("target", &self.target)
            .finish()
    }
}

/// 有序路由表
#[derive(Debug, Clone)]
pub struct RoutingTable<T> {
    rules: Vec<RoutingRule<T>>,
    default_target: T,
}

impl<T: Clone> RoutingTable<T> {
    pub fn new(default_target: T) -> Self {
        Self {
            rules: Vec::new(),
            default_target,
        }
    }

    pub fn with_rule(mut self, rule: RoutingRule<T>) -> Self {
        self.rules.push(rule);
        self
    }

    /// 追加到末尾
    pub fn push(&mut self, rule: RoutingRule<T>) {
        self.rules.push(rule);
    }

    /// 插入到指定位置，越界时追加到末尾
    pub fn insert(&mut self, index: usize, rule: RoutingRule<T>) {
        let index = index.min(self.rules.len());
        self.rules.insert(index, rule);
    }

    /// 按名称删除规则
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        self.rules.len() != before
    }

    pub fn set_rules(&mut self, rules: Vec<RoutingRule<T>>) {
        self.rules = rules;
    }

    /// 第一条命中的规则
    pub fn find(&self, subject: &str) -> Option<&RoutingRule<T>> {
        self.rules.iter().find(|r| r.predicate.matches(subject))
    }

    /// 解析目标，未命中时返回默认目标
    pub fn resolve(&self, subject: &str) -> T {
        self.find(subject)
            .map(|r| r.target.clone())
            .unwrap_or_else(|| self.default_target.clone())
    }

    pub fn rules(&self) -> &[RoutingRule<T>] {
        &self.rules
    }

    pub fn default_target(&self) -> &T {
        &self.default_target
    }
}
