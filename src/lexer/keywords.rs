use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::token::TokenKind;

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    HashMap::from([
        ("打断", TokenKind::Break),
        ("继续", TokenKind::Continue),
        ("类", TokenKind::Class),
        ("切换", TokenKind::Switch),
        ("案例", TokenKind::Case),
        ("预设", TokenKind::Default),
        ("否则", TokenKind::Else),
        ("功能", TokenKind::Fun),
        ("而", TokenKind::While),
        ("对于", TokenKind::For),
        ("如果", TokenKind::If),
        ("空", TokenKind::Nil),
        ("返回", TokenKind::Return),
        ("超", TokenKind::Super),
        ("真", TokenKind::True),
        ("假", TokenKind::False),
        ("这", TokenKind::This),
        ("变量", TokenKind::Var),
        ("和", TokenKind::And),
        ("或", TokenKind::Or),
        ("打印", TokenKind::Print),
    ])
});

pub fn keyword_lookup(lexeme: &str) -> Option<TokenKind> {
    KEYWORDS.get(lexeme).cloned()
}
