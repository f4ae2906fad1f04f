/// file: src/sources.rs
/// description: Per-site search scrapers — CSS-selector extraction into Product.
/// Each source is a bespoke scrape of one site's current search-results
/// markup. Selectors are coupled to site layout and break when the site
/// redesigns; a parse failure on one card skips that card only.
use crate::models::Product;
use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Source registry
// ---------------------------------------------------------------------------

/// How a source's search page is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Plain GET; the markup is server-rendered.
    Http,
    /// Client-rendered page; needs a headless browser to settle first.
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    Jumia,
    Kilimall,
    Jiji,
    Masoko,
    Amazon,
    AliExpress,
}

impl SourceId {
    pub const ALL: [SourceId; 6] = [
        SourceId::Jumia,
        SourceId::Kilimall,
        SourceId::Jiji,
        SourceId::Masoko,
        SourceId::Amazon,
        SourceId::AliExpress,
    ];

    /// Resolve a config name ("jumia", "aliexpress", …).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "jumia" => Some(SourceId::Jumia),
            "kilimall" => Some(SourceId::Kilimall),
            "jiji" => Some(SourceId::Jiji),
            "masoko" => Some(SourceId::Masoko),
            "amazon" => Some(SourceId::Amazon),
            "aliexpress" => Some(SourceId::AliExpress),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceId::Jumia => "jumia",
            SourceId::Kilimall => "kilimall",
            SourceId::Jiji => "jiji",
            SourceId::Masoko => "masoko",
            SourceId::Amazon => "amazon",
            SourceId::AliExpress => "aliexpress",
        }
    }

    /// Human-readable label stored on every Product.
    pub fn label(&self) -> &'static str {
        match self {
            SourceId::Jumia => "Jumia Kenya",
            SourceId::Kilimall => "Kilimall",
            SourceId::Jiji => "Jiji Kenya",
            SourceId::Masoko => "Masoko",
            SourceId::Amazon => "Amazon",
            SourceId::AliExpress => "AliExpress",
        }
    }

    pub fn kind(&self) -> FetchKind {
        match self {
            SourceId::Amazon | SourceId::AliExpress => FetchKind::Browser,
            _ => FetchKind::Http,
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        match self {
            SourceId::Jumia => format!(
                "https://www.jumia.co.ke/catalog/?q={}",
                urlencoding::encode(query)
            ),
            SourceId::Kilimall => format!(
                "https://www.kilimall.co.ke/search?q={}",
                urlencoding::encode(query)
            ),
            SourceId::Jiji => format!(
                "https://jiji.co.ke/search?query={}",
                urlencoding::encode(query)
            ),
            SourceId::Masoko => format!(
                "https://www.masoko.com/search-results?query={}",
                urlencoding::encode(query)
            ),
            // These two expect '+' separators rather than percent-encoding.
            SourceId::Amazon => {
                format!("https://www.amazon.com/s?k={}", query.replace(' ', "+"))
            }
            SourceId::AliExpress => format!(
                "https://www.aliexpress.com/wholesale?SearchText={}",
                query.replace(' ', "+")
            ),
        }
    }

    /// Extract products from a fetched search-results page.
    pub fn parse_listing(&self, html: &str) -> Vec<Product> {
        let doc = Html::parse_document(html);
        match self {
            SourceId::Jumia => parse_jumia(&doc),
            SourceId::Kilimall => parse_kilimall(&doc),
            SourceId::Jiji => parse_jiji(&doc),
            SourceId::Masoko => parse_masoko(&doc),
            SourceId::Amazon => parse_amazon(&doc),
            SourceId::AliExpress => parse_aliexpress(&doc),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared extraction helpers
// ---------------------------------------------------------------------------

/// 8-char listing identifier; the cache, detail lookup, and favorites key on it.
fn new_product_id() -> String {
    Uuid::new_v4().to_string()[..8].to_owned()
}

/// Synthetic rating in [3.0, 5.0), rounded to 1 decimal.
fn synth_rating() -> f64 {
    let r: f64 = rand::rng().random_range(3.0..5.0);
    (r * 10.0).round() / 10.0
}

/// Strip a currency marker and thousands separators, then parse.
/// Returns None when nothing numeric remains.
fn clean_amount(text: &str) -> Option<f64> {
    let cleaned = text
        .replace("KSh", "")
        .replace("KES", "")
        .replace('$', "")
        .replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// "KSh 1,299.00" -> 1299.
fn clean_price(text: &str) -> Option<i64> {
    clean_amount(text).map(|p| p as i64)
}

fn select_first<'a>(el: &ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    el.select(&sel).next()
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}

/// Lazy-loading sites publish the real URL in data-src with a placeholder in
/// src; prefer data-src.
fn image_url(img: &ElementRef<'_>) -> Option<String> {
    img.value()
        .attr("data-src")
        .or_else(|| img.value().attr("src"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_owned()
    } else {
        format!("{base}{href}")
    }
}

// ---------------------------------------------------------------------------
// Jumia Kenya
// ---------------------------------------------------------------------------

fn parse_jumia(doc: &Html) -> Vec<Product> {
    let Ok(card_sel) = Selector::parse("article.prd") else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for card in doc.select(&card_sel) {
        // Name, price, and link are all mandatory on a Jumia card.
        let Some(name_el) = select_first(&card, "h3.name") else {
            debug!(source = "jumia", "card missing name, skipping");
            continue;
        };
        let Some(price) = select_first(&card, ".prc").and_then(|el| clean_price(&text_of(&el)))
        else {
            debug!(source = "jumia", "card missing price, skipping");
            continue;
        };
        let Some(href) = select_first(&card, "a.core").and_then(|a| {
            a.value().attr("href").map(ToOwned::to_owned)
        }) else {
            continue;
        };
        let image = select_first(&card, "img").and_then(|img| image_url(&img));

        products.push(Product {
            id: new_product_id(),
            name: text_of(&name_el),
            price,
            image,
            source: SourceId::Jumia.label().to_owned(),
            url: absolutize("https://www.jumia.co.ke", &href),
            rating: synth_rating(),
        });
    }
    products
}

// ---------------------------------------------------------------------------
// Kilimall
// ---------------------------------------------------------------------------

fn parse_kilimall(doc: &Html) -> Vec<Product> {
    let Ok(card_sel) = Selector::parse(".listing-item") else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(anchor) = select_first(&card, "a") else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        let name = select_first(&card, ".product-title")
            .map(|el| text_of(&el))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No name".to_owned());

        // A missing price tag means an unpriced listing (0); an unparseable
        // one means the card layout changed, so skip it.
        let price = match select_first(&card, ".product-price") {
            Some(el) => match clean_price(&text_of(&el)) {
                Some(p) => p,
                None => {
                    debug!(source = "kilimall", "unparseable price, skipping card");
                    continue;
                }
            },
            None => 0,
        };

        // Relative image paths live on the Kilimall image CDN.
        let image = select_first(&card, "img")
            .and_then(|img| image_url(&img))
            .map(|src| absolutize("https://image.kilimall.com", &src));

        products.push(Product {
            id: new_product_id(),
            name,
            price,
            image,
            source: SourceId::Kilimall.label().to_owned(),
            url: absolutize("https://www.kilimall.co.ke", href),
            rating: synth_rating(),
        });
    }
    products
}

// ---------------------------------------------------------------------------
// Jiji Kenya
// ---------------------------------------------------------------------------

fn parse_jiji(doc: &Html) -> Vec<Product> {
    let Ok(card_sel) = Selector::parse(".b-list-advert__gallery__item") else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(anchor) = select_first(&card, "a") else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        let name = select_first(&card, ".b-advert-title-inner")
            .map(|el| text_of(&el))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No title".to_owned());

        let price = match select_first(&card, ".qa-advert-price") {
            Some(el) => match clean_price(&text_of(&el)) {
                Some(p) => p,
                None => {
                    debug!(source = "jiji", "unparseable price, skipping card");
                    continue;
                }
            },
            None => 0,
        };

        // Jiji serves final image URLs directly in src.
        let image = select_first(&card, "img")
            .and_then(|img| img.value().attr("src").map(ToOwned::to_owned))
            .filter(|s| !s.is_empty());

        products.push(Product {
            id: new_product_id(),
            name,
            price,
            image,
            source: SourceId::Jiji.label().to_owned(),
            url: absolutize("https://jiji.co.ke", href),
            rating: synth_rating(),
        });
    }
    products
}

// ---------------------------------------------------------------------------
// Masoko
// ---------------------------------------------------------------------------

fn parse_masoko(doc: &Html) -> Vec<Product> {
    let Ok(card_sel) = Selector::parse(".mui-style-bb8yqv") else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for card in doc.select(&card_sel) {
        let name = select_first(&card, "[appearance=\"h2\"]")
            .map(|el| text_of(&el))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No name".to_owned());

        let price = match select_first(&card, "[appearance=\"subtitle\"]") {
            Some(el) => match clean_price(&text_of(&el)) {
                Some(p) => p,
                None => {
                    debug!(source = "masoko", "unparseable price, skipping card");
                    continue;
                }
            },
            None => 0,
        };

        let Some(href) = select_first(&card, "a[data-testid=\"product-card-linkout\"]")
            .and_then(|a| a.value().attr("href").map(ToOwned::to_owned))
        else {
            continue;
        };

        let image = select_first(&card, "img")
            .and_then(|img| img.value().attr("src").map(ToOwned::to_owned))
            .filter(|s| !s.is_empty());

        products.push(Product {
            id: new_product_id(),
            name,
            price,
            image,
            source: SourceId::Masoko.label().to_owned(),
            url: absolutize("https://www.masoko.com", &href),
            rating: synth_rating(),
        });
    }
    products
}

// ---------------------------------------------------------------------------
// Amazon (browser-rendered)
// ---------------------------------------------------------------------------

/// Fixed USD -> KES conversion applied to dollar-priced sources.
const USD_TO_KES: f64 = 150.0;

fn parse_amazon(doc: &Html) -> Vec<Product> {
    let Ok(card_sel) =
        Selector::parse("div.s-main-slot div[data-component-type=\"s-search-result\"]")
    else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(title_anchor) = select_first(&card, "h2 a") else {
            continue;
        };
        let Some(title_el) = select_first(&title_anchor, "span") else {
            continue;
        };
        let Some(href) = title_anchor.value().attr("href") else {
            continue;
        };

        // Cards without a price block (sponsored placements, out-of-stock)
        // are skipped outright.
        let whole = select_first(&card, "span.a-price > span.a-price-whole");
        let frac = select_first(&card, "span.a-price > span.a-price-fraction");
        let (Some(whole), Some(frac)) = (whole, frac) else {
            continue;
        };
        let price_str = format!(
            "{}.{}",
            text_of(&whole).replace(',', ""),
            text_of(&frac)
        );
        let Ok(usd) = price_str.parse::<f64>() else {
            debug!(source = "amazon", "unparseable price, skipping card");
            continue;
        };

        let image = select_first(&card, "img.s-image")
            .and_then(|img| img.value().attr("src").map(ToOwned::to_owned));

        products.push(Product {
            id: new_product_id(),
            name: text_of(&title_el),
            price: (usd * USD_TO_KES) as i64,
            image,
            source: SourceId::Amazon.label().to_owned(),
            url: absolutize("https://www.amazon.com", href),
            rating: synth_rating(),
        });
    }
    products
}

// ---------------------------------------------------------------------------
// AliExpress (browser-rendered)
// ---------------------------------------------------------------------------

fn parse_aliexpress(doc: &Html) -> Vec<Product> {
    let Ok(card_sel) = Selector::parse("div[data-widget-type=\"productCard\"]") else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(title) = select_first(&card, "a[data-widget-type=\"productTitle\"]") else {
            continue;
        };
        let Some(href) = title.value().attr("href") else {
            continue;
        };
        let name = text_of(&title);
        if name.is_empty() {
            continue;
        }

        let Some(usd) = select_first(&card, "div[data-widget-type=\"price\"]")
            .and_then(|el| clean_amount(&text_of(&el)))
        else {
            continue;
        };

        let image = select_first(&card, "img")
            .and_then(|img| img.value().attr("src").map(ToOwned::to_owned));

        products.push(Product {
            id: new_product_id(),
            name,
            price: (usd * USD_TO_KES) as i64,
            image,
            source: SourceId::AliExpress.label().to_owned(),
            url: absolutize("https://www.aliexpress.com", href),
            rating: synth_rating(),
        });
    }
    products
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_round_trip() {
        for id in SourceId::ALL {
            assert_eq!(SourceId::from_name(id.name()), Some(id));
        }
        assert_eq!(SourceId::from_name("ebay"), None);
    }

    #[test]
    fn search_urls_encode_queries() {
        assert_eq!(
            SourceId::Jumia.search_url("wireless mouse"),
            "https://www.jumia.co.ke/catalog/?q=wireless%20mouse"
        );
        assert_eq!(
            SourceId::Amazon.search_url("wireless mouse"),
            "https://www.amazon.com/s?k=wireless+mouse"
        );
    }

    #[test]
    fn cleans_prices() {
        assert_eq!(clean_price("KSh 1,299"), Some(1299));
        assert_eq!(clean_price("KSh 1,299.50"), Some(1299));
        assert_eq!(clean_price("KES 45,000"), Some(45000));
        assert_eq!(clean_price("$12.99"), Some(12));
        assert_eq!(clean_price("  "), None);
        assert_eq!(clean_price("Contact seller"), None);
    }

    #[test]
    fn generated_ids_are_short_and_unique() {
        let a = new_product_id();
        let b = new_product_id();
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn ratings_stay_in_band() {
        for _ in 0..100 {
            let r = synth_rating();
            assert!((3.0..=5.0).contains(&r), "rating out of band: {r}");
            // One decimal place.
            assert_eq!((r * 10.0).round(), r * 10.0);
        }
    }

    #[test]
    fn parses_jumia_cards() {
        let html = r#"
            <html><body>
              <article class="prd">
                <a class="core" href="/logitech-m185.html">
                  <img data-src="https://ke.jumia.is/m185.jpg" src="data:image/gif;base64,placeholder">
                  <h3 class="name">Logitech M185 Wireless Mouse</h3>
                  <div class="prc">KSh 1,850</div>
                </a>
              </article>
              <article class="prd">
                <a class="core" href="/broken.html">
                  <h3 class="name">Card without price</h3>
                </a>
              </article>
            </body></html>"#;

        let products = SourceId::Jumia.parse_listing(html);
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.name, "Logitech M185 Wireless Mouse");
        assert_eq!(p.price, 1850);
        assert_eq!(p.source, "Jumia Kenya");
        assert_eq!(p.url, "https://www.jumia.co.ke/logitech-m185.html");
        // data-src wins over the lazy-load placeholder.
        assert_eq!(p.image.as_deref(), Some("https://ke.jumia.is/m185.jpg"));
        assert_eq!(p.id.len(), 8);
    }

    #[test]
    fn parses_kilimall_lazy_images_and_relative_urls() {
        let html = r#"
            <div class="listing-item">
              <a href="/listing/infinix-hot-40"></a>
              <div class="product-title">Infinix Hot 40</div>
              <div class="product-price">KSh 14,500</div>
              <img src="/2024/phone.webp">
            </div>
            <div class="listing-item">
              <div class="product-title">No anchor, skipped</div>
            </div>"#;

        let products = SourceId::Kilimall.parse_listing(html);
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.price, 14500);
        assert_eq!(p.url, "https://www.kilimall.co.ke/listing/infinix-hot-40");
        assert_eq!(
            p.image.as_deref(),
            Some("https://image.kilimall.com/2024/phone.webp")
        );
    }

    #[test]
    fn kilimall_missing_price_tag_defaults_to_zero() {
        let html = r#"
            <div class="listing-item">
              <a href="https://www.kilimall.co.ke/free-item"></a>
              <div class="product-title">Mystery Box</div>
            </div>"#;

        let products = SourceId::Kilimall.parse_listing(html);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].price, 0);
        assert_eq!(products[0].image, None);
    }

    #[test]
    fn parses_jiji_with_title_fallback() {
        let html = r#"
            <div class="b-list-advert__gallery__item">
              <a href="/nairobi/sofa-set.html"></a>
              <div class="qa-advert-price">KSh 85,000</div>
              <img src="https://pictures-kenya.jijistatic.net/sofa.webp">
            </div>"#;

        let products = SourceId::Jiji.parse_listing(html);
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.name, "No title");
        assert_eq!(p.price, 85000);
        assert_eq!(p.url, "https://jiji.co.ke/nairobi/sofa-set.html");
        assert_eq!(p.source, "Jiji Kenya");
    }

    #[test]
    fn parses_masoko_cards() {
        let html = r#"
            <div class="mui-style-bb8yqv">
              <span appearance="h2">Samsung Galaxy A15</span>
              <span appearance="subtitle">KES 18,999</span>
              <img src="https://masoko-cdn.example/a15.png">
              <a data-testid="product-card-linkout" href="/product/samsung-galaxy-a15"></a>
            </div>"#;

        let products = SourceId::Masoko.parse_listing(html);
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.name, "Samsung Galaxy A15");
        assert_eq!(p.price, 18999);
        assert_eq!(p.url, "https://www.masoko.com/product/samsung-galaxy-a15");
    }

    #[test]
    fn amazon_converts_usd_and_skips_priceless_cards() {
        let html = r#"
            <div class="s-main-slot">
              <div data-component-type="s-search-result">
                <h2><a href="/dp/B0TESTMOUSE"><span>Ergo Mouse</span></a></h2>
                <span class="a-price">
                  <span class="a-price-whole">24</span>
                  <span class="a-price-fraction">99</span>
                </span>
                <img class="s-image" src="https://m.media-amazon.com/mouse.jpg">
              </div>
              <div data-component-type="s-search-result">
                <h2><a href="/dp/B0NOPRICE"><span>Unpriced Thing</span></a></h2>
              </div>
            </div>"#;

        let products = SourceId::Amazon.parse_listing(html);
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.name, "Ergo Mouse");
        assert_eq!(p.price, (24.99 * USD_TO_KES) as i64);
        assert_eq!(p.url, "https://www.amazon.com/dp/B0TESTMOUSE");
    }

    #[test]
    fn parses_aliexpress_cards() {
        let html = r#"
            <div data-widget-type="productCard">
              <a data-widget-type="productTitle" href="/item/100500.html">USB-C Hub 7 in 1</a>
              <div data-widget-type="price">$10.00</div>
              <img src="https://ae01.alicdn.com/hub.jpg">
            </div>
            <div data-widget-type="productCard">
              <a data-widget-type="productTitle" href="/item/100501.html">No price item</a>
            </div>"#;

        let products = SourceId::AliExpress.parse_listing(html);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].price, 1500);
        assert_eq!(products[0].url, "https://www.aliexpress.com/item/100500.html");
    }
}
