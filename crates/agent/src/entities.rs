//! Deterministic classification used when the language model is unavailable
//! or returns something unusable: a keyword table for the intent and a set of
//! regular expressions for entities.

use concierge_core::{ClassificationSource, Intent, IntentClassification};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};

pub const EXACT_PHRASE_CONFIDENCE: f64 = 0.7;
pub const VERB_NOUN_CONFIDENCE: f64 = 0.6;
pub const UNKNOWN_CONFIDENCE: f64 = 0.5;

const EXACT_PHRASES: &[(Intent, &[&str])] = &[
    (Intent::CreateOrder, &["创建订单", "新建订单", "增加订单", "create order"]),
    (Intent::ApproveOrder, &["审核订单", "批准订单", "approve order"]),
    (Intent::RejectOrder, &["拒绝订单", "驳回订单", "reject order"]),
    (Intent::QueryCustomer, &["查询客户", "查看客户", "query customer"]),
    (Intent::QueryProduct, &["查询产品", "查看产品", "query product"]),
    (Intent::QueryInventory, &["查询库存", "查看库存", "query inventory"]),
    (Intent::CreateQuote, &["创建报价", "新建报价", "create quote"]),
    (Intent::QueryOrder, &["查询订单", "查看订单", "query order"]),
];

const CREATE_VERBS: &[&str] = &["创建", "新建", "新增", "增加", "生成", "create", "new", "add", "place", "make"];
const APPROVE_VERBS: &[&str] = &["审核", "批准", "通过", "approve", "accept"];
const REJECT_VERBS: &[&str] = &["拒绝", "驳回", "reject", "decline"];
const QUERY_VERBS: &[&str] = &[
    "查询", "查看", "查", "搜索", "看看", "query", "show", "find", "search", "check", "list", "view",
    "lookup", "get",
];

const ORDER_NOUNS: &[&str] = &["订单", "order"];
const QUOTE_NOUNS: &[&str] = &["报价", "quote", "quotation"];
const CUSTOMER_NOUNS: &[&str] = &["客户", "customer", "client"];
const PRODUCT_NOUNS: &[&str] = &["产品", "商品", "product"];
const INVENTORY_NOUNS: &[&str] = &["库存", "inventory", "stock"];

const VERB_NOUN_PAIRS: &[(Intent, &[&str], &[&str])] = &[
    (Intent::CreateOrder, CREATE_VERBS, ORDER_NOUNS),
    (Intent::CreateQuote, CREATE_VERBS, QUOTE_NOUNS),
    (Intent::ApproveOrder, APPROVE_VERBS, ORDER_NOUNS),
    (Intent::RejectOrder, REJECT_VERBS, ORDER_NOUNS),
    (Intent::QueryCustomer, QUERY_VERBS, CUSTOMER_NOUNS),
    (Intent::QueryProduct, QUERY_VERBS, PRODUCT_NOUNS),
    (Intent::QueryInventory, QUERY_VERBS, INVENTORY_NOUNS),
    (Intent::QueryOrder, QUERY_VERBS, ORDER_NOUNS),
];

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:个|台|件|套|箱|(?:kg|units?|pcs|pieces?|sets?|box(?:es)?)\b)")
        .expect("quantity pattern is valid")
});

static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(万|元|块|(?:rmb|yuan|usd|dollars?)\b)")
        .expect("amount pattern is valid")
});

static ORDER_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-zA-Z])(so\d{4,})").expect("order number pattern is valid")
});

static COMPANY_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"([^\s,，。:：]+?(?:有限公司|股份公司|集团|科技公司|贸易公司))",
        r"((?:北京|上海|广州|深圳|杭州|成都|武汉)[^\s,，。]+?(?:公司|集团))",
        r"\b((?:[A-Z][\w&.-]*\s+){0,4}?[A-Z][\w&.-]*\s+(?:Inc|LLC|Ltd|Corp|Group|GmbH)\b\.?)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("company pattern is valid"))
    .collect()
});

static LABELLED_RES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("customer_name", r"(?i)\bcustomer(?:\s+name)?\s*(?:is|:|=)\s*(.+?)(?:\s+and\s+|[,，。;；\n]|$)"),
        ("customer_name", r"客户(?:名称|名)?\s*(?:是|为|:|：)\s*([^\s,，。;；]+)"),
        ("product_name", r"(?i)\bproduct(?:\s+name)?\s*(?:is|:|=)\s*(.+?)(?:\s+and\s+|[,，。;；\n]|$)"),
        ("product_name", r"产品(?:名称|名)?\s*(?:是|为|:|：)\s*([^\s,，。;；]+)"),
        ("quantity", r"(?i)\b(?:quantity|qty)\s*(?:is|:|=)\s*(\d+(?:\.\d+)?)"),
        ("quantity", r"数量\s*(?:是|为|:|：)\s*(\d+(?:\.\d+)?)"),
    ]
    .into_iter()
    .map(|(slot, pattern)| (slot, Regex::new(pattern).expect("labelled slot pattern is valid")))
    .collect()
});

/// Keyword classification: an exact phrase wins outright, otherwise the
/// verb and noun pair whose noun appears earliest in the text.
pub fn classify_by_keywords(text: &str) -> (Intent, f64) {
    let lowered = text.to_lowercase();

    for (intent, phrases) in EXACT_PHRASES {
        if phrases.iter().any(|phrase| find_term(&lowered, phrase, false).is_some()) {
            return (*intent, EXACT_PHRASE_CONFIDENCE);
        }
    }

    let mut best: Option<(usize, Intent)> = None;
    for (intent, verbs, nouns) in VERB_NOUN_PAIRS {
        if !verbs.iter().any(|verb| find_term(&lowered, verb, false).is_some()) {
            continue;
        }
        let Some(position) = nouns.iter().filter_map(|noun| find_term(&lowered, noun, true)).min()
        else {
            continue;
        };
        if best.map_or(true, |(current, _)| position < current) {
            best = Some((position, *intent));
        }
    }

    match best {
        Some((_, intent)) => (intent, VERB_NOUN_CONFIDENCE),
        None => (Intent::Unknown, UNKNOWN_CONFIDENCE),
    }
}

/// Regex entity extraction, independent of the intent. Labelled values
/// (`customer is ...`, `数量是5`) override heuristic matches for the same slot.
pub fn extract_entities(text: &str) -> Map<String, Value> {
    let mut entities = Map::new();

    if let Some(quantity) = QUANTITY_RE.captures(text).and_then(|caps| number_at(&caps, 1)) {
        entities.insert("quantity".to_string(), quantity);
    }

    if let Some(caps) = AMOUNT_RE.captures(text) {
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let multiplier = if unit == "万" { 10_000.0 } else { 1.0 };
        let amount = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|value| value * multiplier)
            .and_then(Number::from_f64);
        if let Some(amount) = amount {
            entities.insert("amount".to_string(), Value::Number(amount));
        }
    }

    if let Some(order) = ORDER_NUMBER_RE.captures(text).and_then(|caps| caps.get(1)) {
        entities.insert("order_number".to_string(), Value::String(order.as_str().to_uppercase()));
    }

    if let Some(company) = COMPANY_RES
        .iter()
        .find_map(|pattern| pattern.captures(text).and_then(|caps| caps.get(1)))
    {
        entities.insert("customer_name".to_string(), Value::String(company.as_str().trim().to_string()));
    }

    for (slot, pattern) in LABELLED_RES.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let value = if *slot == "quantity" {
            number_at(&caps, 1)
        } else {
            caps.get(1)
                .map(|m| m.as_str().trim())
                .filter(|value| !value.is_empty())
                .map(|value| Value::String(value.to_string()))
        };
        if let Some(value) = value {
            entities.insert((*slot).to_string(), value);
        }
    }

    entities
}

pub fn fallback_classification(text: &str) -> IntentClassification {
    let (intent, confidence) = classify_by_keywords(text);
    IntentClassification {
        intent,
        confidence,
        entities: extract_entities(text),
        source_text: text.to_string(),
        source: ClassificationSource::Fallback,
        reasoning: None,
    }
}

/// Whether `text` mentions `term`. Latin terms match whole words, CJK terms
/// match as substrings.
pub fn mentions(text: &str, term: &str) -> bool {
    find_term(&text.to_lowercase(), term, false).is_some()
}

fn find_term(lowered: &str, term: &str, allow_plural: bool) -> Option<usize> {
    if !term.is_ascii() {
        return lowered.find(term);
    }

    let phrase: Vec<&str> = term.split_whitespace().collect();
    let (last, leading) = phrase.split_last()?;
    let words = latin_words(lowered);
    words.windows(phrase.len()).find_map(|window| {
        let (tail, head) = window.split_last()?;
        let head_matches = head.iter().zip(leading).all(|((_, word), expected)| word == expected);
        let tail_matches = tail.1 == *last
            || (allow_plural
                && (tail.1.strip_suffix('s') == Some(*last) || tail.1.strip_suffix("es") == Some(*last)));
        (head_matches && tail_matches).then_some(window[0].0)
    })
}

fn latin_words(text: &str) -> Vec<(usize, &str)> {
    let mut words = Vec::new();
    let mut start = None;
    for (index, ch) in text.char_indices() {
        if ch.is_ascii_alphanumeric() {
            start.get_or_insert(index);
        } else if let Some(begin) = start.take() {
            words.push((begin, &text[begin..index]));
        }
    }
    if let Some(begin) = start {
        words.push((begin, &text[begin..]));
    }
    words
}

fn number_at(caps: &Captures<'_>, group: usize) -> Option<Value> {
    let raw = caps.get(group)?.as_str();
    if let Ok(integer) = raw.parse::<i64>() {
        return Some(Value::from(integer));
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}
